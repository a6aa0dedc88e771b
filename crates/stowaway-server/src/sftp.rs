//! SFTP subsystem handler.
//!
//! One [`SftpSession`] per accepted `sftp` subsystem request. It translates
//! decoded SFTP packets onto [`FileOps`] and keeps the table of open
//! handles; dropping the session releases every handle it still holds.

use std::collections::HashMap;
use std::time::UNIX_EPOCH;

use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Packet, Status, StatusCode,
    Version,
};
use stowaway_vfs::{
    EntryKind, EntryMetadata, FileCmd, FileHandle, FileOps, ListCmd, Listing, ListingEntry,
    VfsError,
};

use crate::constants::READDIR_PAGE_SIZE;

const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// Map a VFS failure onto the status code sent to the client.
pub fn status_for(err: &VfsError) -> StatusCode {
    match err {
        VfsError::NotFound(_) => StatusCode::NoSuchFile,
        VfsError::AccessDenied(_) | VfsError::PathTraversalRejected(_) => {
            StatusCode::PermissionDenied
        }
        VfsError::UnsupportedOperation(_) => StatusCode::OpUnsupported,
        VfsError::NotADirectory(_) | VfsError::Io(_) => StatusCode::Failure,
    }
}

/// SFTP attributes for a listing row, with file type bits in `permissions`.
pub fn attrs_for(entry: &impl EntryMetadata) -> FileAttributes {
    let type_bits = match entry.kind() {
        EntryKind::Directory => S_IFDIR,
        EntryKind::Symlink => S_IFLNK,
        EntryKind::File => S_IFREG,
    };
    let mtime = entry
        .modified()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);

    FileAttributes {
        size: Some(entry.size()),
        permissions: Some(type_bits | entry.permissions()),
        atime: Some(mtime),
        mtime: Some(mtime),
        ..Default::default()
    }
}

fn attrs_for_row(entry: &ListingEntry) -> FileAttributes {
    let mut attrs = attrs_for(entry);
    if let Some((uid, gid)) = entry.owner() {
        attrs.uid = Some(uid);
        attrs.gid = Some(gid);
    }
    attrs
}

enum OpenHandle {
    File(FileHandle),
    Dir {
        path: String,
        listing: Listing,
        offset: u64,
    },
}

/// Per-subsystem SFTP state.
pub struct SftpSession {
    ops: FileOps,
    handles: HashMap<String, OpenHandle>,
    next_handle: u64,
}

impl SftpSession {
    pub fn new(ops: FileOps) -> Self {
        Self {
            ops,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn insert(&mut self, handle: OpenHandle) -> String {
        self.next_handle += 1;
        let id = self.next_handle.to_string();
        self.handles.insert(id.clone(), handle);
        id
    }

    fn reject(op: &str, err: VfsError) -> StatusCode {
        match &err {
            VfsError::PathTraversalRejected(_) => {
                tracing::warn!(op, error = %err, "path rejected");
            }
            _ => tracing::warn!(op, error = %err, "operation failed"),
        }
        status_for(&err)
    }

    fn ok(id: u32) -> Status {
        Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        }
    }

    /// Run the command named `method` and acknowledge it.
    async fn command(
        &self,
        id: u32,
        method: &str,
        path: String,
        target: Option<String>,
    ) -> Result<Status, StatusCode> {
        let cmd = FileCmd::from_method(method, path, target).map_err(|e| Self::reject(method, e))?;
        self.ops
            .file_cmd(cmd)
            .await
            .map(|()| Self::ok(id))
            .map_err(|e| Self::reject(method, e))
    }

    /// Run the listing named `method` and return its only row.
    async fn single(&self, method: &str, path: String) -> Result<ListingEntry, StatusCode> {
        let cmd = ListCmd::from_method(method, path).map_err(|e| Self::reject(method, e))?;
        let listing = self
            .ops
            .file_list(cmd)
            .await
            .map_err(|e| Self::reject(method, e))?;
        listing
            .into_iter()
            .next()
            .ok_or(StatusCode::Failure)
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        tracing::debug!(open = self.handles.len(), "sftp session ended, releasing handles");
    }
}

impl russh_sftp::server::Handler for SftpSession {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        tracing::debug!(version, "sftp init");
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let wants_write = pflags.intersects(
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::APPEND,
        );

        let file = if wants_write {
            self.ops.file_write(&filename).await
        } else {
            self.ops.file_read(&filename).await
        }
        .map_err(|e| Self::reject("open", e))?;

        let handle = self.insert(OpenHandle::File(file));
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        match self.handles.remove(&handle) {
            Some(OpenHandle::File(file)) => {
                file.close().await.map_err(|e| Self::reject("close", e))?;
                Ok(Self::ok(id))
            }
            Some(OpenHandle::Dir { .. }) => Ok(Self::ok(id)),
            None => Err(StatusCode::Failure),
        }
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let Some(OpenHandle::File(file)) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::Failure);
        };

        let data = file
            .read_at(offset, len)
            .await
            .map_err(|e| Self::reject("read", e))?;
        if data.is_empty() && len > 0 {
            return Err(StatusCode::Eof);
        }
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let Some(OpenHandle::File(file)) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::Failure);
        };

        file.write_at(offset, &data)
            .await
            .map_err(|e| Self::reject("write", e))?;
        Ok(Self::ok(id))
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let entry = self.single("Lstat", path).await?;
        Ok(Attrs {
            id,
            attrs: attrs_for_row(&entry),
        })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let entry: ListingEntry = match self.handles.get(&handle) {
            Some(OpenHandle::File(file)) => file
                .metadata()
                .await
                .map_err(|e| Self::reject("fstat", e))?
                .into(),
            Some(OpenHandle::Dir { path, .. }) => {
                let path = path.clone();
                self.single("Stat", path).await?
            }
            None => return Err(StatusCode::Failure),
        };
        Ok(Attrs {
            id,
            attrs: attrs_for_row(&entry),
        })
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.command(id, "Setstat", path, None).await
    }

    async fn fsetstat(
        &mut self,
        id: u32,
        handle: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        if self.handles.contains_key(&handle) {
            Ok(Self::ok(id))
        } else {
            Err(StatusCode::Failure)
        }
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let cmd = ListCmd::from_method("List", path.clone()).map_err(|e| Self::reject("List", e))?;
        let listing = self
            .ops
            .file_list(cmd)
            .await
            .map_err(|e| Self::reject("List", e))?;

        let handle = self.insert(OpenHandle::Dir {
            path,
            listing,
            offset: 0,
        });
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let Some(OpenHandle::Dir {
            listing, offset, ..
        }) = self.handles.get_mut(&handle)
        else {
            return Err(StatusCode::Failure);
        };

        let page = listing.list_at(*offset, READDIR_PAGE_SIZE);
        if page.entries.is_empty() {
            return Err(StatusCode::Eof);
        }

        *offset += page.entries.len() as u64;
        let files = page
            .entries
            .iter()
            .map(|entry| File::new(entry.name(), attrs_for_row(entry)))
            .collect();
        Ok(Name { id, files })
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        self.command(id, "Remove", filename, None).await
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.command(id, "Mkdir", path, None).await
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        self.command(id, "Rmdir", path, None).await
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let resolved = self
            .ops
            .realpath(&path)
            .map_err(|e| Self::reject("realpath", e))?;
        Ok(Name {
            id,
            files: vec![File::new(resolved, FileAttributes::default())],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let entry = self.single("Stat", path).await?;
        Ok(Attrs {
            id,
            attrs: attrs_for_row(&entry),
        })
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        self.command(id, "Rename", oldpath, Some(newpath)).await
    }

    async fn readlink(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let entry = self.single("Readlink", path).await?;
        Ok(Name {
            id,
            files: vec![File::new(entry.name(), attrs_for_row(&entry))],
        })
    }

    /// OpenSSH sends the link target first and the new link second, the
    /// reverse of the field names russh-sftp decodes them into.
    async fn symlink(
        &mut self,
        id: u32,
        target: String,
        link: String,
    ) -> Result<Status, Self::Error> {
        self.command(id, "Symlink", link, Some(target)).await
    }

    /// Extension payloads are not decoded; every extended request is
    /// answered with OpUnsupported.
    async fn extended(
        &mut self,
        _id: u32,
        request: String,
        _data: Vec<u8>,
    ) -> Result<Packet, Self::Error> {
        Err(Self::reject("extended", VfsError::unsupported(request)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh_sftp::server::Handler;
    use stowaway_vfs::Root;
    use tempfile::TempDir;

    fn session() -> (TempDir, SftpSession) {
        let dir = TempDir::new().unwrap();
        let root = Root::new(dir.path()).unwrap();
        (dir, SftpSession::new(FileOps::new(root)))
    }

    #[tokio::test]
    async fn test_write_then_read_through_handles() {
        let (_dir, mut s) = session();

        let h = s
            .open(
                1,
                "/inbox/a.txt".into(),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                FileAttributes::default(),
            )
            .await
            .unwrap();
        s.write(2, h.handle.clone(), 0, b"hello".to_vec())
            .await
            .unwrap();
        s.close(3, h.handle).await.unwrap();
        assert_eq!(s.open_handles(), 0);

        let h = s
            .open(4, "inbox/a.txt".into(), OpenFlags::READ, FileAttributes::default())
            .await
            .unwrap();
        let data = s.read(5, h.handle.clone(), 0, 1024).await.unwrap();
        assert_eq!(data.data, b"hello");
        assert_eq!(
            s.read(6, h.handle.clone(), 5, 1024).await.unwrap_err(),
            StatusCode::Eof
        );

        let attrs = s.fstat(7, h.handle).await.unwrap();
        assert_eq!(attrs.attrs.size, Some(5));
        assert_eq!(attrs.attrs.permissions.map(|p| p & S_IFREG), Some(S_IFREG));
    }

    #[tokio::test]
    async fn test_read_handle_rejects_write() {
        let (dir, mut s) = session();
        std::fs::write(dir.path().join("r.txt"), b"x").unwrap();

        let h = s
            .open(1, "r.txt".into(), OpenFlags::READ, FileAttributes::default())
            .await
            .unwrap();
        assert_eq!(
            s.write(2, h.handle, 0, b"y".to_vec()).await.unwrap_err(),
            StatusCode::PermissionDenied
        );
    }

    #[tokio::test]
    async fn test_traversal_is_permission_denied() {
        let (_dir, mut s) = session();
        let err = s
            .open(
                1,
                "../../etc/passwd".into(),
                OpenFlags::READ,
                FileAttributes::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::PermissionDenied);
        assert_eq!(s.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_no_such_file() {
        let (_dir, mut s) = session();
        let err = s.stat(1, "/nope".into()).await.unwrap_err();
        assert_eq!(err, StatusCode::NoSuchFile);
    }

    #[tokio::test]
    async fn test_readdir_pages_then_eof() {
        let (dir, mut s) = session();
        let count = READDIR_PAGE_SIZE + 3;
        for i in 0..count {
            std::fs::write(dir.path().join(format!("f{i:04}")), b"").unwrap();
        }

        let h = s.opendir(1, "/".into()).await.unwrap();
        let first = s.readdir(2, h.handle.clone()).await.unwrap();
        assert_eq!(first.files.len(), READDIR_PAGE_SIZE);
        assert_eq!(first.files[0].filename, "f0000");

        let second = s.readdir(3, h.handle.clone()).await.unwrap();
        assert_eq!(second.files.len(), 3);

        assert_eq!(
            s.readdir(4, h.handle.clone()).await.unwrap_err(),
            StatusCode::Eof
        );
        s.close(5, h.handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_opendir_on_file_fails() {
        let (dir, mut s) = session();
        std::fs::write(dir.path().join("f"), b"").unwrap();
        assert_eq!(
            s.opendir(1, "f".into()).await.unwrap_err(),
            StatusCode::Failure
        );
    }

    #[tokio::test]
    async fn test_commands() {
        let (dir, mut s) = session();

        s.mkdir(1, "/a/b".into(), FileAttributes::default())
            .await
            .unwrap();
        assert!(dir.path().join("a/b").is_dir());

        std::fs::write(dir.path().join("a/b/f"), b"1").unwrap();
        assert_eq!(
            s.rmdir(2, "/a/b".into()).await.unwrap_err(),
            StatusCode::Failure
        );
        assert!(dir.path().join("a/b/f").exists());

        s.rename(3, "/a/b/f".into(), "/a/g".into()).await.unwrap();
        s.remove(4, "/a/g".into()).await.unwrap();
        s.rmdir(5, "/a/b".into()).await.unwrap();

        assert_eq!(
            s.rmdir(6, "/".into()).await.unwrap_err(),
            StatusCode::PermissionDenied
        );
        assert_eq!(
            s.rename(7, "/a".into(), "/../escaped".into())
                .await
                .unwrap_err(),
            StatusCode::PermissionDenied
        );

        s.setstat(8, "/a".into(), FileAttributes::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_symlink_and_readlink() {
        let (dir, mut s) = session();
        std::fs::write(dir.path().join("target.txt"), b"t").unwrap();

        // Wire order as OpenSSH sends it: target, then the new link.
        s.symlink(1, "/target.txt".into(), "/link".into())
            .await
            .unwrap();
        assert!(
            std::fs::read_link(dir.path().join("link"))
                .unwrap()
                .ends_with("target.txt")
        );
        let name = s.readlink(2, "/link".into()).await.unwrap();
        assert_eq!(name.files.len(), 1);
        assert_eq!(name.files[0].filename, "target.txt");

        let lstat = s.lstat(3, "/link".into()).await.unwrap();
        assert_eq!(
            lstat.attrs.permissions.map(|p| p & 0o170000),
            Some(S_IFLNK)
        );
    }

    #[tokio::test]
    async fn test_overlapping_uploads_do_not_mix() {
        let (dir, mut s) = session();
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;

        let long = s
            .open(1, "/up.bin".into(), flags, FileAttributes::default())
            .await
            .unwrap();
        let short = s
            .open(2, "/up.bin".into(), flags, FileAttributes::default())
            .await
            .unwrap();
        s.write(3, long.handle.clone(), 0, vec![b'a'; 4096])
            .await
            .unwrap();
        s.write(4, short.handle.clone(), 0, vec![b'b'; 10])
            .await
            .unwrap();

        s.close(5, long.handle).await.unwrap();
        s.close(6, short.handle).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("up.bin")).unwrap(), vec![b'b'; 10]);
    }

    #[tokio::test]
    async fn test_dropped_session_commits_open_uploads() {
        let (dir, mut s) = session();
        let h = s
            .open(
                1,
                "/left-open.txt".into(),
                OpenFlags::WRITE | OpenFlags::CREATE,
                FileAttributes::default(),
            )
            .await
            .unwrap();
        s.write(2, h.handle, 0, b"kept".to_vec()).await.unwrap();
        assert!(!dir.path().join("left-open.txt").exists());

        drop(s);
        assert_eq!(std::fs::read(dir.path().join("left-open.txt")).unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_extended_requests_unsupported() {
        let (_dir, mut s) = session();
        let err = s
            .extended(1, "posix-rename@openssh.com".into(), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::OpUnsupported);
    }

    #[tokio::test]
    async fn test_realpath() {
        let (_dir, mut s) = session();
        let name = s.realpath(1, ".".into()).await.unwrap();
        assert_eq!(name.files[0].filename, "/");
        let name = s.realpath(2, "a/./b/../c".into()).await.unwrap();
        assert_eq!(name.files[0].filename, "/a/c");
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let (_dir, mut s) = session();
        assert_eq!(
            s.read(1, "999".into(), 0, 10).await.unwrap_err(),
            StatusCode::Failure
        );
        assert_eq!(
            s.close(2, "999".into()).await.unwrap_err(),
            StatusCode::Failure
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&VfsError::traversal("../x")),
            StatusCode::PermissionDenied
        );
        assert_eq!(status_for(&VfsError::not_found("x")), StatusCode::NoSuchFile);
        assert_eq!(
            status_for(&VfsError::unsupported("chown")),
            StatusCode::OpUnsupported
        );
        assert_eq!(
            status_for(&VfsError::not_a_directory("x")),
            StatusCode::Failure
        );
    }
}
