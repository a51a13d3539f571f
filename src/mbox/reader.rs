//! Iteration over the messages of an mbox archive (mboxo flavour).

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Yields each message's raw bytes, without its `From ` separator line.
///
/// Bytes found before the first separator are yielded as a message of their
/// own when they are not blank. A chunk that starts in the middle of a message
/// therefore produces one fragment rather than silently losing it.
pub struct MboxReader<R: BufRead> {
    reader: R,
    done: bool,
}

impl<R: BufRead> MboxReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }
}

impl MboxReader<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut message = Vec::new();
        let mut line = Vec::new();

        while !self.done {
            line.clear();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => self.done = true,
                Ok(_) if line.starts_with(b"From ") => {
                    if !is_blank(&message) {
                        break;
                    }
                    message.clear();
                }
                Ok(_) if line.starts_with(b">From ") => message.extend_from_slice(&line[1..]),
                Ok(_) => message.extend_from_slice(&line),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }

        if is_blank(&message) {
            return None;
        }

        // Separator blank line.
        while message.ends_with(b"\n\n") || message.ends_with(b"\r\n\r\n") {
            message.pop();
            if message.ends_with(b"\r") {
                message.pop();
            }
        }
        Some(Ok(message))
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Number of `From ` separator lines in an archive.
pub fn count_messages<R: Read>(reader: R) -> io::Result<u64> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut count = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.starts_with(b"From ") {
            count += 1;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(data: &[u8]) -> Vec<Vec<u8>> {
        MboxReader::new(Cursor::new(data.to_vec()))
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_splits_on_separator_lines() {
        let data = b"From a@example.com Mon Jan  1 00:00:00 2024\nSubject: One\n\nHello\n>From the shop\n\nFrom b@example.com Mon Jan  1 00:00:00 2024\nSubject: Two\n\nBye\n";
        let messages = read_all(data);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], b"Subject: One\n\nHello\nFrom the shop\n");
        assert_eq!(messages[1], b"Subject: Two\n\nBye\n");
        assert_eq!(count_messages(Cursor::new(data)).unwrap(), 2);
    }

    #[test]
    fn test_leading_fragment_is_yielded() {
        let data = b"tail of a bisected body\n\nFrom c@example.com Tue Jan  2 00:00:00 2024\nSubject: Three\n\nok\n";
        let messages = read_all(data);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], b"tail of a bisected body\n");
        assert!(messages[1].starts_with(b"Subject: Three"));
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert!(read_all(b"").is_empty());
        assert!(read_all(b"\n\n").is_empty());
        assert!(read_all(b"From x Mon Jan  1 00:00:00 2024\n\n").is_empty());
    }
}
