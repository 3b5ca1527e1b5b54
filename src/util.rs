/// THIS MOD SHOULD NOT USE THINGS FROM OTHER MODS IN THIS CRATE.
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

// TODO use a custom error struct instead of std::io::Error
macro_rules! err {
    ( $message:expr ) => {
        std::io::Error::new(std::io::ErrorKind::Other, $message)
    };
    ( $message:expr, $($arg:expr),* ) => {
        std::io::Error::new(std::io::ErrorKind::Other, format!($message, $($arg),*))
    };
}

/// `None` if `path` is not rooted at `root`.
pub fn subpath(path: &Path, root: &Path) -> Option<PathBuf> {
    let root_comps_len = root.components().count();
    match path.starts_with(root) {
        true => Some(path.components().skip(root_comps_len).collect()),
        false => None,
    }
}

/// read exactly count number of bytes from src
pub fn read_exact<R>(count: usize, src: &mut R) -> io::Result<Vec<u8>>
where
    R: Read,
{
    let mut reservoir: Vec<u8> = Vec::with_capacity(count);
    let mut buffer = vec![0u8; count];

    loop {
        match count - reservoir.len() {
            0 => break Ok(reservoir),
            bytes_left => match src.read(&mut buffer[..bytes_left])? {
                0 => break Err(err!("there was less than {} bytes", count)),
                bytes_read => (&buffer[..bytes_read]).iter().for_each(|byte| reservoir.push(*byte)),
            },
        }
    }
}
