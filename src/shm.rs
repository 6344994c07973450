//! POSIX shared-memory files for overlay pixel buffers
//!
//! Each drawable layer gets its own shm file, created under a randomized name
//! and unlinked immediately so the only handle left is the file descriptor we
//! pass to the compositor. Names are randomized from the OS CSPRNG; a
//! predictable name would let an unprivileged observer race the create/unlink
//! window.

use std::ffi::CString;
use std::os::fd::OwnedFd;

use anyhow::{anyhow, Context, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::random::EntropySource;

const NAME_PREFIX: &str = "/wl-cloak-";
const NAME_RANDOM_LEN: usize = 10;
const NAME_ALPHABET: &[u8; 52] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const CREATE_RETRIES: u32 = 100;

/// Fill `out` with random letters from the shm-name alphabet.
///
/// Rejection-sampled so every letter is equally likely.
fn randomize_name(out: &mut [u8], entropy: &mut dyn EntropySource) {
    let limit = u8::MAX - u8::MAX % NAME_ALPHABET.len() as u8;
    for slot in out.iter_mut() {
        let mut byte = [0u8; 1];
        loop {
            entropy.fill_bytes(&mut byte);
            if byte[0] < limit {
                break;
            }
        }
        *slot = NAME_ALPHABET[byte[0] as usize % NAME_ALPHABET.len()];
    }
}

/// Create an unlinked POSIX shm file of `size` bytes.
///
/// The name is randomized and retried on `EEXIST`; the file is unlinked as
/// soon as the descriptor is open, so it never appears under `/dev/shm` for
/// longer than the creation itself.
pub fn create_shm_file(size: usize, entropy: &mut dyn EntropySource) -> Result<OwnedFd> {
    let mut random_part = [0u8; NAME_RANDOM_LEN];
    let mut retries = CREATE_RETRIES;

    let fd = loop {
        randomize_name(&mut random_part, entropy);
        let mut name = Vec::with_capacity(NAME_PREFIX.len() + NAME_RANDOM_LEN);
        name.extend_from_slice(NAME_PREFIX.as_bytes());
        name.extend_from_slice(&random_part);
        let name = CString::new(name).expect("shm name is NUL-free by construction");

        match shm_open(
            name.as_c_str(),
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => {
                shm_unlink(name.as_c_str()).context("failed to unlink shm file")?;
                break fd;
            }
            Err(Errno::EEXIST) if retries > 0 => {
                retries -= 1;
                continue;
            }
            Err(e) => {
                return Err(anyhow!(e)).context("failed to create shared memory file");
            }
        }
    };

    loop {
        match ftruncate(&fd, size as i64) {
            Ok(()) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(anyhow!(e))
                    .context(format!("failed to size shared memory file to {size} bytes"));
            }
        }
    }

    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::OsEntropy;
    use std::os::fd::AsRawFd;

    #[test]
    fn name_alphabet_is_letters_only() {
        let mut out = [0u8; 64];
        randomize_name(&mut out, &mut OsEntropy);
        assert!(out.iter().all(|b| b.is_ascii_alphabetic()));
    }

    #[test]
    fn creates_file_of_requested_size() {
        let fd = create_shm_file(4096, &mut OsEntropy).unwrap();
        let file = std::fs::File::from(fd);
        assert_eq!(file.metadata().unwrap().len(), 4096);
    }

    #[test]
    fn distinct_names_do_not_collide() {
        // Two live descriptors at once; EEXIST retries make this reliable
        let a = create_shm_file(512, &mut OsEntropy).unwrap();
        let b = create_shm_file(512, &mut OsEntropy).unwrap();
        assert_ne!(a.as_raw_fd(), b.as_raw_fd());
    }
}
