mod cli;

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tiny_fs::{
    BlockDevice, FileKey, FormatOptions, MountOptions, OpenFlag, Permission, TinyFileSystem,
};
use tiny_fs_fuse::BlockFile;
use vfs::DirEntryType;

use self::cli::{Cli, Command};

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mount = MountOptions {
        cache_slots: cli.cache_slots,
        ..MountOptions::default()
    };

    if let Command::Format {
        blocks,
        inodes,
        layout,
    } = cli.command
    {
        let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(&cli.image, blocks)?);
        let options = FormatOptions {
            total_blocks: blocks,
            inodes,
            layout,
        };
        let tfs = TinyFileSystem::format_with(device, options, mount).map_err(to_io)?;
        let max = tfs.lock().layout().max_file_size();
        println!("{}: {blocks} blocks, {inodes} inodes, max file size {max}", cli.image.display());
        return Ok(());
    }

    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(&cli.image)?);
    let tfs = TinyFileSystem::open(device, mount).map_err(to_io)?;
    let mut tfs = tfs.lock();

    match cli.command {
        Command::Format { .. } => unreachable!("handled above"),
        Command::Put { host, path, key } => {
            let data = fs::read(host)?;
            put(&mut tfs, &path, &data, key.as_deref())?;
        }
        Command::Cat { path, key } => {
            let data = cat(&mut tfs, &path, key.as_deref())?;
            io::stdout().write_all(&data)?;
        }
        Command::Ls { path } => {
            for entry in tfs.read_dir(&path).map_err(to_io)? {
                let marker = match entry.ty {
                    DirEntryType::Directory => "/",
                    DirEntryType::Regular => "",
                };
                println!("{:>6} {}{marker}", entry.inode, entry.name);
            }
        }
        Command::Mkdir { path } => tfs
            .mkdir(&path, Permission::from_mode(0o755))
            .map_err(to_io)?,
        Command::Rm { path } => tfs.unlink(&path).map_err(to_io)?,
        Command::Rmdir { path } => tfs.rmdir(&path).map_err(to_io)?,
        Command::Ln { existing, new } => tfs.link(&existing, &new).map_err(to_io)?,
        Command::Stat { path } => {
            let stat = tfs.stat(&path).map_err(to_io)?;
            println!("{stat:#?}");
        }
        Command::Df => {
            let statfs = tfs.statfs().map_err(to_io)?;
            println!(
                "blocks {}/{} free, inodes {}/{} free, block size {}",
                statfs.free_blocks,
                statfs.total_blocks,
                statfs.free_inodes,
                statfs.total_inodes,
                statfs.block_size
            );
        }
        Command::Pack { source, dest } => pack(&mut tfs, &source, &dest)?,
    }

    tfs.unmount().map_err(to_io)
}

fn put(tfs: &mut TinyFileSystem, path: &str, data: &[u8], key: Option<&str>) -> io::Result<()> {
    let flags = OpenFlag::Write | OpenFlag::Create | OpenFlag::Truncate;
    let permission = Permission::from_mode(0o644);
    let fd = match key {
        Some(key) => tfs.open_with_key(path, flags, permission, FileKey::from_passphrase(key)),
        None => tfs.open_file(path, flags, permission),
    }
    .map_err(to_io)?;

    let written = tfs.write(fd, data).map_err(to_io);
    tfs.close(fd).map_err(to_io)?;
    let written = written?;
    if written < data.len() {
        log::warn!("{path}: only {written} of {} bytes fit", data.len());
    }
    log::info!("{path}: {written} bytes");

    Ok(())
}

fn cat(tfs: &mut TinyFileSystem, path: &str, key: Option<&str>) -> io::Result<Vec<u8>> {
    let flags = OpenFlag::Read.into();
    let permission = Permission::from_mode(0);
    let fd = match key {
        Some(key) => tfs.open_with_key(path, flags, permission, FileKey::from_passphrase(key)),
        None => tfs.open_file(path, flags, permission),
    }
    .map_err(to_io)?;

    let mut data = Vec::new();
    let mut buf = vec![0; tiny_fs::BLOCK_SIZE];
    let result = loop {
        match tfs.read(fd, &mut buf) {
            Ok(0) => break Ok(()),
            Ok(read) => data.extend_from_slice(&buf[..read]),
            Err(err) => break Err(to_io(err)),
        }
    };
    tfs.close(fd).map_err(to_io)?;
    result?;

    Ok(data)
}

fn pack(tfs: &mut TinyFileSystem, source: &Path, dest: &str) -> io::Result<()> {
    if dest != "/" && tfs.stat(dest).is_err() {
        tfs.mkdir(dest, Permission::from_mode(0o755))
            .map_err(to_io)?;
    }

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skip non UTF-8 name {:?}", entry.file_name());
            continue;
        };

        let path = format!("{}/{name}", dest.trim_end_matches('/'));
        let data = fs::read(entry.path())?;
        println!("pack {path} ({} bytes)", data.len());
        put(tfs, &path, &data, None)?;
    }

    Ok(())
}

fn to_io(err: tiny_fs::Error) -> io::Error {
    io::Error::other(err)
}
