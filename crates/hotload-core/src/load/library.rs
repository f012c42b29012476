//! Mapping artifact bytes into the process.
//!
//! The system loader only opens paths. On Linux the bytes go into an
//! anonymous memory file and are opened through `/proc/self/fd`; elsewhere
//! (or when that is unavailable) they are written to a uniquely named
//! temporary file that lives as long as the library.

use std::io::Write;
use std::path::PathBuf;

use libloading::Library;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Where the image a library was opened from lives.
#[derive(Debug)]
enum Image {
    /// Never closed: the system loader caches images by path, so the
    /// descriptor number must not come to name a different image.
    #[cfg(target_os = "linux")]
    Memfd(std::os::fd::RawFd),
    TempFile(NamedTempFile),
}

/// A dynamic library opened from in-memory bytes.
pub(crate) struct LoadedLibrary {
    // dropped before the image
    library: Library,
    image: Image,
}

impl std::fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}

impl LoadedLibrary {
    /// Open `bytes` (the artifact registered as `name`) as a library.
    ///
    /// # Safety
    /// Opening a library runs its initializers. The bytes must come from
    /// this crate's compilation driver or an archive of its output.
    pub(crate) unsafe fn open(name: &str, bytes: &[u8]) -> Result<Self> {
        #[cfg(target_os = "linux")]
        match memfd_image(name, bytes) {
            Ok(fd) => {
                let path = PathBuf::from(format!("/proc/self/fd/{}", fd));
                let library = match unsafe { Library::new(&path) } {
                    Ok(library) => library,
                    Err(e) => {
                        // a failed open is not cached, so the descriptor can go
                        unsafe { libc::close(fd) };
                        return Err(invalid(name, e));
                    }
                };
                tracing::debug!("Loaded {} from {}", name, path.display());
                return Ok(Self {
                    library,
                    image: Image::Memfd(fd),
                });
            }
            Err(e) => tracing::debug!("memfd unavailable for {}, using a temp file: {}", name, e),
        }

        let mut file = tempfile::Builder::new()
            .prefix("hotload-image-")
            .suffix(&format!(".{}", crate::compile::dylib_extension()))
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        let library = unsafe { Library::new(file.path()) }.map_err(|e| invalid(name, e))?;
        tracing::debug!("Loaded {} from {}", name, file.path().display());
        Ok(Self {
            library,
            image: Image::TempFile(file),
        })
    }

    pub(crate) fn library(&self) -> &Library {
        &self.library
    }
}

fn invalid(name: &str, e: libloading::Error) -> Error {
    Error::InvalidArtifact {
        name: name.to_string(),
        reason: format!("not a loadable library: {}", e),
    }
}

#[cfg(target_os = "linux")]
fn memfd_image(name: &str, bytes: &[u8]) -> std::io::Result<std::os::fd::RawFd> {
    use std::ffi::CString;
    use std::fs::File;
    use std::os::fd::{FromRawFd, IntoRawFd};

    let label = CString::new(format!("hotload:{}", name))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let fd = unsafe { libc::memfd_create(label.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: fd was just created and is owned by nobody else.
    let mut file = unsafe { File::from_raw_fd(fd) };
    file.write_all(bytes)?;

    if !std::path::Path::new(&format!("/proc/self/fd/{}", fd)).exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "/proc/self/fd is not mounted",
        ));
    }

    Ok(file.into_raw_fd())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_are_invalid() {
        let err = unsafe { LoadedLibrary::open("p::Junk", b"definitely not a library") }.unwrap_err();
        assert!(matches!(err, Error::InvalidArtifact { .. }));
    }
}
