mod block_file;

#[cfg(test)]
mod tests;

pub use self::block_file::BlockFile;
