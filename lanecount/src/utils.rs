//! # Utility module

use crate::error::{Error, Result};
use log::*;
use std::io::Read;
use std::net::{TcpListener, TcpStream};

/// Open a file or an input stream.
///
/// `tcp://host:port` connects to a remote stream, and `tcp://@:port` waits for a single incoming
/// connection on the given port. Anything else is opened as a file.
pub fn open_file(input: &str) -> Result<Box<dyn Read + Send>> {
    if let Some(input) = input.strip_prefix("tcp://") {
        let (addr, port) = input
            .split_once(':')
            .ok_or_else(|| Error::Source(format!("invalid stream address `{input}`")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::Source(format!("invalid port `{port}`")))?;

        let stream = if addr == "@" {
            let listener = TcpListener::bind(("0.0.0.0", port))?;
            info!("Waiting for a connection on port {port}");
            let (sock, addr) = listener.accept()?;
            info!("Accepted {addr}");
            sock
        } else {
            info!("Connecting to {input}");
            TcpStream::connect(input)?
        };

        Ok(Box::new(stream))
    } else {
        std::fs::File::open(input)
            .map(|i| Box::new(i) as _)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.mfr");
        std::fs::write(&path, [1, 2, 3]).unwrap();

        let mut buf = vec![];
        open_file(path.to_str().unwrap())
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();

        assert_eq!(buf, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_malformed_stream_addresses() {
        assert!(matches!(open_file("tcp://localhost"), Err(Error::Source(_))));
        assert!(matches!(open_file("tcp://localhost:port"), Err(Error::Source(_))));
        assert!(matches!(open_file("/does/not/exist.mfr"), Err(Error::Io(_))));
    }
}
