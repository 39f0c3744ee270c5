//! Mapped buffer memory and fd plumbing.
//!
//! - [`DmaBufMapping`]: RAII CPU mapping of a buffer fd
//! - [`ipc`]: passing buffer handles between processes with `SCM_RIGHTS`
//! - [`inode`]: kernel identity of an fd, used by diagnostics

mod dmabuf;
pub mod ipc;

pub use dmabuf::DmaBufMapping;

use crate::error::Result;
use rustix::fd::AsFd;

/// Inode number of the file behind `fd`.
///
/// Two fds share an inode if and only if they refer to the same buffer.
pub fn inode<Fd: AsFd>(fd: Fd) -> Result<u64> {
    Ok(rustix::fs::fstat(fd)?.st_ino as u64)
}

/// Size in bytes of the file behind `fd`.
pub fn file_size<Fd: AsFd>(fd: Fd) -> Result<u64> {
    Ok(rustix::fs::fstat(fd)?.st_size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustix::fd::AsFd;

    #[test]
    fn test_dup_shares_inode() {
        let fd = rustix::fs::memfd_create("inode", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        rustix::fs::ftruncate(&fd, 64).unwrap();
        let dup = rustix::io::fcntl_dupfd_cloexec(&fd, 0).unwrap();

        assert_eq!(inode(fd.as_fd()).unwrap(), inode(dup.as_fd()).unwrap());
        assert_eq!(file_size(&dup).unwrap(), 64);

        let other = rustix::fs::memfd_create("other", rustix::fs::MemfdFlags::CLOEXEC).unwrap();
        assert_ne!(inode(&fd).unwrap(), inode(&other).unwrap());
    }
}
