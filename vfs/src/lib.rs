#![no_std]

extern crate alloc;

mod dirent;
mod error;
mod stat;

pub use self::{
    dirent::{DirEntry, DirEntryType},
    error::Error,
    stat::{Stat, StatFs},
};
