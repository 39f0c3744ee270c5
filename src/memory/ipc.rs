//! Passing buffer handles between processes.
//!
//! A handle's fds travel as `SCM_RIGHTS` ancillary data; its header travels
//! in the same message as a length-prefixed payload.
//!
//! ```text
//! +------------+--------------------------+   ancillary: [fd0, .., fdN-1, attr]
//! | len (u32)  | rkyv HandleHeader bytes  |
//! +------------+--------------------------+
//! ```

use crate::error::{Error, Result};
use crate::handle::{HandleHeader, RawBufferHandle};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::net::{
    RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags, recvmsg, sendmsg,
};
use std::io::{IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::unix::net::UnixStream;

/// Maximum number of file descriptors that can be sent in a single message.
///
/// Covers the largest buffer: three memory fds plus the attribute fd.
pub const MAX_FDS_PER_MESSAGE: usize = 4;

/// Largest header payload accepted by [`recv_handle`].
pub const MAX_HEADER_SIZE: usize = 4096;

/// Send file descriptors over a Unix socket.
///
/// # Arguments
///
/// * `socket` - The Unix socket to send over.
/// * `fds` - File descriptors to send.
/// * `data` - Payload sent with the fds. At least one byte is always sent.
pub fn send_fds<Fd: AsFd>(socket: &UnixStream, fds: &[Fd], data: &[u8]) -> Result<()> {
    if fds.is_empty() {
        return Err(Error::BadValue("no file descriptors to send".into()));
    }
    if fds.len() > MAX_FDS_PER_MESSAGE {
        return Err(Error::BadValue(format!(
            "too many fds: {} > {}",
            fds.len(),
            MAX_FDS_PER_MESSAGE
        )));
    }

    // SCM_RIGHTS needs at least one byte of data
    let data = if data.is_empty() { &[0u8] } else { data };

    let borrowed_fds: Vec<BorrowedFd<'_>> = fds.iter().map(|fd| fd.as_fd()).collect();

    let mut ancillary_space: [MaybeUninit<u8>; 64] = [const { MaybeUninit::uninit() }; 64];
    let mut ancillary = SendAncillaryBuffer::new(&mut ancillary_space);

    if !ancillary.push(SendAncillaryMessage::ScmRights(&borrowed_fds)) {
        return Err(Error::NoResources(
            "failed to add fds to ancillary buffer".into(),
        ));
    }

    let iov = [IoSlice::new(data)];
    sendmsg(socket, &iov, &mut ancillary, SendFlags::empty())?;

    Ok(())
}

/// Receive file descriptors from a Unix socket.
///
/// Returns the number of payload bytes read and the received fds.
pub fn recv_fds(socket: &UnixStream, data_buf: &mut [u8]) -> Result<(usize, Vec<OwnedFd>)> {
    if data_buf.is_empty() {
        return Err(Error::BadValue("data buffer cannot be empty".into()));
    }

    let mut ancillary_space: [MaybeUninit<u8>; 64] = [const { MaybeUninit::uninit() }; 64];
    let mut ancillary = RecvAncillaryBuffer::new(&mut ancillary_space);

    let mut iov = [IoSliceMut::new(data_buf)];
    let result = recvmsg(socket, &mut iov, &mut ancillary, RecvFlags::CMSG_CLOEXEC)?;

    let mut fds = Vec::new();
    for msg in ancillary.drain() {
        if let RecvAncillaryMessage::ScmRights(rights) = msg {
            fds.extend(rights);
        }
    }

    Ok((result.bytes, fds))
}

/// Send a buffer handle to another process.
///
/// The caller keeps its own fds; the receiver gets duplicates.
///
/// # Example
///
/// ```rust,ignore
/// let (tx, rx) = UnixStream::pair()?;
/// send_handle(&tx, &raw)?;
/// let received = recv_handle(&rx)?;
/// mapper.import(&received)?;
/// ```
pub fn send_handle(socket: &UnixStream, handle: &RawBufferHandle) -> Result<()> {
    handle.validate()?;
    let header = handle.header.to_bytes()?;
    if header.len() > MAX_HEADER_SIZE {
        return Err(Error::BadValue(format!(
            "handle header too large: {} bytes",
            header.len()
        )));
    }

    let mut payload = Vec::with_capacity(4 + header.len());
    payload.extend_from_slice(&(header.len() as u32).to_le_bytes());
    payload.extend_from_slice(&header);

    send_fds(socket, &handle.fds, &payload)
}

/// Receive a buffer handle sent with [`send_handle`].
///
/// The received handle is validated before it is returned.
pub fn recv_handle(socket: &UnixStream) -> Result<RawBufferHandle> {
    let mut buf = vec![0u8; 4 + MAX_HEADER_SIZE];
    let (bytes_read, fds) = recv_fds(socket, &mut buf)?;

    if bytes_read < 4 {
        return Err(Error::BadBuffer(format!(
            "expected length prefix, got {bytes_read} bytes"
        )));
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if bytes_read != 4 + len {
        return Err(Error::BadBuffer(format!(
            "expected {} header bytes, got {}",
            len,
            bytes_read - 4
        )));
    }

    let header = HandleHeader::from_bytes(&buf[4..4 + len])?;
    let handle = RawBufferHandle { header, fds };
    handle.validate()?;
    Ok(handle)
}
