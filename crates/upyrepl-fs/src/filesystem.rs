//! Filesystem operations expressed as generated remote code.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};
use upyrepl_metrics::{metric_defs, port_labels};
use upyrepl_protocol::{CancelToken, RawSession, RemoteErrorKind, ReplEngine, ReplError, StreamHandle};
use upyrepl_transport::Transport;

use crate::path::{join_remote, quote_path, quote_str};
use crate::{listing, snippets, FsError, FsResult, RemoteEntry, TransferConfig};

/// A MicroPython board's flash filesystem, driven through its raw REPL.
///
/// Every operation is a live round trip; nothing is cached. Operations that
/// need several commands run them inside one raw session.
pub struct RemoteFilesystem<T: Transport> {
    engine: Arc<ReplEngine<T>>,
    transfer: TransferConfig,
}

impl<T: Transport> RemoteFilesystem<T> {
    /// Filesystem over `engine` with default transfer settings.
    pub fn new(engine: Arc<ReplEngine<T>>) -> Self {
        Self::with_transfer_config(engine, TransferConfig::default())
    }

    /// Filesystem over `engine` with explicit transfer settings.
    pub fn with_transfer_config(engine: Arc<ReplEngine<T>>, transfer: TransferConfig) -> Self {
        RemoteFilesystem { engine, transfer }
    }

    /// The underlying protocol engine.
    pub fn engine(&self) -> &Arc<ReplEngine<T>> {
        &self.engine
    }

    /// The transfer settings.
    pub fn transfer_config(&self) -> &TransferConfig {
        &self.transfer
    }

    // ------------------------------------------------------------------
    // Directory listing
    // ------------------------------------------------------------------

    /// List `path` in the order the device reports.
    ///
    /// Each name is classified by trying to list it as a directory and falling
    /// back to `stat`, so a listing of N entries costs up to 2×N+1 round trips.
    /// Entries that vanish between the listing and their probe are left out.
    pub fn list(&self, path: &str) -> FsResult<Vec<RemoteEntry>> {
        let quoted = quote_path(path)?;
        let entries = self
            .engine
            .with_session(|session| Self::list_in(session, path, &quoted))?;
        debug!("RemoteFs[{}]: {} entries in {}", self.engine.name(), entries.len(), path);
        Ok(entries)
    }

    fn list_in(session: &mut RawSession<'_, T>, path: &str, quoted: &str) -> FsResult<Vec<RemoteEntry>> {
        let listing = match session.execute(&snippets::list_dir(quoted)) {
            Ok(output) => output,
            Err(ReplError::RemoteExecution(e)) if e.kind() == RemoteErrorKind::NotFound => {
                return Err(FsError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for name in listing::parse_names(&listing)? {
            let name = name.as_str();
            let child = quote_str(&join_remote(path, name));
            match session.execute(&snippets::probe_dir(&child)) {
                Ok(_) => entries.push(RemoteEntry::directory(name)),
                Err(ReplError::RemoteExecution(_)) => match session.execute(&snippets::stat(&child)) {
                    Ok(_) => entries.push(RemoteEntry::file(name)),
                    Err(ReplError::RemoteExecution(e)) if e.kind() == RemoteErrorKind::NotFound => {
                        trace!("{} vanished while listing {}", name, path);
                    }
                    Err(e) => return Err(e.into()),
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(entries)
    }

    /// Whether anything exists at `path`. A failing `stat` means no.
    pub fn exists(&self, path: &str) -> FsResult<bool> {
        let quoted = quote_path(path)?;
        match self.engine.execute(&snippets::stat(&quoted)) {
            Ok(_) => Ok(true),
            Err(ReplError::RemoteExecution(e)) => {
                trace!("RemoteFs[{}]: stat {} failed: {}", self.engine.name(), path, e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Single statements
    // ------------------------------------------------------------------

    /// Create a directory. The parent must exist.
    pub fn create_directory(&self, path: &str) -> FsResult<()> {
        self.run_statement(&snippets::mkdir(&quote_path(path)?))
    }

    /// Create an empty file, truncating an existing one.
    pub fn create_file(&self, path: &str) -> FsResult<()> {
        self.run_statement(&snippets::create_file(&quote_path(path)?))
    }

    /// Rename or move an entry.
    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let snippet = snippets::rename(&quote_path(from)?, &quote_path(to)?);
        self.run_statement(&snippet)
    }

    /// Delete a file.
    pub fn delete_file(&self, path: &str) -> FsResult<()> {
        self.run_statement(&snippets::remove(&quote_path(path)?))
    }

    fn run_statement(&self, snippet: &str) -> FsResult<()> {
        self.engine.execute(snippet)?;
        Ok(())
    }

    /// Delete a directory and everything below it, in one raw session.
    ///
    /// Issues one remove per file and one rmdir per directory, so N
    /// descendants cost exactly N+1 deleting calls.
    pub fn delete_directory(&self, path: &str) -> FsResult<()> {
        quote_path(path)?;
        self.engine
            .with_session(|session| Self::delete_tree(session, path))?;
        debug!("RemoteFs[{}]: removed tree {}", self.engine.name(), path);
        Ok(())
    }

    fn delete_tree(session: &mut RawSession<'_, T>, path: &str) -> FsResult<()> {
        let quoted = quote_str(path);
        for entry in Self::list_in(session, path, &quoted)? {
            let child = join_remote(path, &entry.name);
            if entry.is_directory {
                Self::delete_tree(session, &child)?;
            } else {
                session.execute(&snippets::remove(&quote_str(&child)))?;
            }
        }
        session.execute(&snippets::rmdir(&quoted))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    /// Copy a remote file to `local` using the configured chunk size.
    pub fn download(&self, remote: &str, local: &Path) -> FsResult<u64> {
        self.download_chunked(remote, local, self.transfer.chunk_size)
    }

    /// Copy a remote file to `local`, `chunk_size` bytes per round trip.
    ///
    /// Parent directories of `local` are created. Data is staged in a
    /// temporary file next to `local` and only replaces it once the whole file
    /// has arrived, so a failed download leaves an existing `local` untouched.
    /// Returns the bytes written.
    pub fn download_chunked(&self, remote: &str, local: &Path, chunk_size: usize) -> FsResult<u64> {
        if chunk_size == 0 {
            return Err(FsError::InvalidChunkSize);
        }
        let quoted = quote_path(remote)?;

        let total = self.engine.with_session(|session| -> FsResult<u64> {
            session.execute(&snippets::open_read(&quoted))?;
            let result = staging_file(local).and_then(|mut staged| {
                let total = Self::pull_chunks(session, staged.as_file_mut(), local, chunk_size)?;
                Ok((staged, total))
            });
            match result {
                Ok((staged, total)) => {
                    session.execute(snippets::close())?;
                    staged
                        .persist(local)
                        .map_err(|e| FsError::io(local)(e.error))?;
                    Ok(total)
                }
                Err(e) => {
                    if let Err(close_err) = session.execute(snippets::close()) {
                        warn!("failed to close {} after error: {}", remote, close_err);
                    }
                    Err(e)
                }
            }
        })?;

        metrics::counter!(metric_defs::FS_DOWNLOAD_BYTES.name, &port_labels(self.engine.name()))
            .increment(total);
        debug!("RemoteFs[{}]: downloaded {} ({} bytes)", self.engine.name(), remote, total);
        Ok(total)
    }

    fn pull_chunks(
        session: &mut RawSession<'_, T>,
        file: &mut File,
        local: &Path,
        chunk_size: usize,
    ) -> FsResult<u64> {
        let snippet = snippets::read_chunk(chunk_size);
        let mut total = 0u64;
        loop {
            let printed = session.execute(&snippet)?;
            let chunk = decode_chunk(&printed)?;
            if chunk.is_empty() {
                return Ok(total);
            }
            file.write_all(&chunk).map_err(FsError::io(local))?;
            total += chunk.len() as u64;
        }
    }

    /// Copy `local` to a remote file using the configured chunk size.
    pub fn upload(&self, local: &Path, remote: &str) -> FsResult<u64> {
        self.upload_chunked(local, remote, self.transfer.chunk_size)
    }

    /// Copy `local` to a remote file, `chunk_size` bytes per round trip.
    ///
    /// An empty local file produces an empty remote file. Returns the bytes sent.
    pub fn upload_chunked(&self, local: &Path, remote: &str, chunk_size: usize) -> FsResult<u64> {
        if chunk_size == 0 {
            return Err(FsError::InvalidChunkSize);
        }
        let quoted = quote_path(remote)?;
        let mut file = File::open(local).map_err(FsError::io(local))?;

        let total = self.engine.with_session(|session| -> FsResult<u64> {
            session.execute(&snippets::open_write(&quoted))?;
            let result = Self::push_chunks(session, &mut file, local, chunk_size);
            match result {
                Ok(total) => {
                    session.execute(snippets::close())?;
                    Ok(total)
                }
                Err(e) => {
                    // Remote write failures already closed the handle on the device.
                    if e.remote().is_none() {
                        if let Err(close_err) = session.execute(snippets::close()) {
                            warn!("failed to close {} after error: {}", remote, close_err);
                        }
                    }
                    Err(e)
                }
            }
        })?;

        metrics::counter!(metric_defs::FS_UPLOAD_BYTES.name, &port_labels(self.engine.name()))
            .increment(total);
        debug!("RemoteFs[{}]: uploaded {} ({} bytes)", self.engine.name(), remote, total);
        Ok(total)
    }

    fn push_chunks(
        session: &mut RawSession<'_, T>,
        file: &mut File,
        local: &Path,
        chunk_size: usize,
    ) -> FsResult<u64> {
        let mut block = vec![0u8; chunk_size];
        let mut total = 0u64;
        loop {
            let filled = fill_block(file, &mut block).map_err(FsError::io(local))?;
            if filled == 0 {
                return Ok(total);
            }
            session.execute(&snippets::write_chunk(&block[..filled]))?;
            total += filled as u64;
            if filled < chunk_size {
                return Ok(total);
            }
        }
    }

    // ------------------------------------------------------------------
    // Device helpers
    // ------------------------------------------------------------------

    /// Reset the board.
    ///
    /// The engine is left unsynced: every further call fails with a
    /// protocol state error until [`RemoteFilesystem::resync`] succeeds.
    pub fn reset(&self) -> FsResult<()> {
        self.engine
            .with_session(|session| session.submit_detached(snippets::reset()))?;
        debug!("RemoteFs[{}]: reset submitted", self.engine.name());
        Ok(())
    }

    /// Resynchronise with the friendly prompt, e.g. after [`RemoteFilesystem::reset`].
    pub fn resync(&self) -> FsResult<()> {
        self.engine.resync()?;
        Ok(())
    }

    /// Execute arbitrary source and return its output.
    pub fn run(&self, snippet: &str) -> FsResult<String> {
        Ok(self.engine.execute(snippet)?)
    }

    /// Print `message` on the device and return what came back.
    pub fn echo(&self, message: &str) -> FsResult<String> {
        Ok(self.engine.execute(&snippets::echo(&quote_str(message)))?)
    }

    /// The device's current working directory.
    pub fn working_directory(&self) -> FsResult<String> {
        Ok(self.engine.execute(snippets::getcwd())?)
    }

    /// Execute a script stored on the device and return its output.
    pub fn execute_file(&self, path: &str) -> FsResult<String> {
        Ok(self.engine.execute(&snippets::exec_file(&quote_path(path)?))?)
    }

    /// Close the engine and its transport. Calling this again is a no-op.
    pub fn close(&self) -> FsResult<()> {
        self.engine.close()?;
        Ok(())
    }
}

impl<T: Transport + 'static> RemoteFilesystem<T> {
    /// Execute source on a background thread, streaming its output.
    ///
    /// Join the returned handle before issuing further calls from this thread.
    pub fn run_streaming<F>(&self, snippet: &str, on_output: F, cancel: CancelToken) -> FsResult<StreamHandle>
    where
        F: FnMut(u8) + Send + 'static,
    {
        Ok(self.engine.execute_streaming(snippet, on_output, cancel)?)
    }
}

/// Turn one printed chunk (`b'...'`) back into bytes.
fn decode_chunk(printed: &str) -> FsResult<Vec<u8>> {
    let body = printed
        .trim()
        .strip_prefix("b'")
        .and_then(|rest| rest.strip_suffix('\''))
        .ok_or_else(|| FsError::MalformedChunk(printed.to_string()))?;
    if body.is_empty() {
        return Ok(Vec::new());
    }
    Ok(STANDARD.decode(body)?)
}

/// A temporary file in the directory `local` will live in, creating that directory.
fn staging_file(local: &Path) -> FsResult<NamedTempFile> {
    let dir = match local.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(FsError::io(parent))?;
            parent
        }
        None => Path::new("."),
    };
    NamedTempFile::new_in(dir).map_err(FsError::io(dir))
}

/// Read until `block` is full or the reader is exhausted.
fn fill_block(reader: &mut impl Read, block: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < block.len() {
        match reader.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_chunk() {
        assert_eq!(decode_chunk("b'aGVsbG8='").unwrap(), b"hello");
        assert!(decode_chunk("b''").unwrap().is_empty());
        assert!(matches!(decode_chunk("hello"), Err(FsError::MalformedChunk(_))));
        assert!(matches!(decode_chunk("b'***'"), Err(FsError::Base64(_))));
    }

    #[test]
    fn test_fill_block_stops_at_eof() {
        let mut reader: &[u8] = b"abcde";
        let mut block = [0u8; 3];
        assert_eq!(fill_block(&mut reader, &mut block).unwrap(), 3);
        assert_eq!(&block, b"abc");
        assert_eq!(fill_block(&mut reader, &mut block).unwrap(), 2);
        assert_eq!(fill_block(&mut reader, &mut block).unwrap(), 0);
    }
}
