use std::fmt;
use std::io::{self, BufRead};

use russh_keys::key;
use russh_keys::PublicKeyBase64;
use thiserror::Error;

/// Errors raised while scanning a key file.
///
/// Both variants are fatal for the run: a key file that does not parse
/// cleanly is treated as corrupt rather than scanned best-effort.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("malformed public key on line {line} ({content:?}): {reason}")]
    Malformed {
        line: usize,
        content: String,
        reason: String,
    },
    #[error("reading key file: {0}")]
    Io(#[from] io::Error),
}

/// A public key taken from one authorized-keys-format line.
///
/// Holds the algorithm token exactly as declared in the file plus the
/// parsed key itself. The raw key material is observable by re-encoding.
#[derive(Debug, Clone)]
pub struct CandidateKey {
    algorithm: String,
    key: key::PublicKey,
}

impl CandidateKey {
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn public_key(&self) -> &key::PublicKey {
        &self.key
    }

    /// Base64 body of the entry, as it would appear in an authorized_keys
    /// file.
    pub fn encoded(&self) -> String {
        self.key.public_key_base64()
    }

    /// SHA256 fingerprint of the key material.
    pub fn fingerprint(&self) -> String {
        self.key.fingerprint()
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} SHA256:{}", self.algorithm, self.fingerprint())
    }
}

/// Expects `<algorithm> <base64> [comment...]`, trailing comment ignored.
fn parse_candidate(line: &str) -> Result<CandidateKey, String> {
    let mut fields = line.split_whitespace();
    let (algorithm, body) = match (fields.next(), fields.next()) {
        (Some(algorithm), Some(body)) => (algorithm, body),
        _ => return Err("expected '<algorithm> <base64> [comment]'".to_owned()),
    };
    let key = russh_keys::parse_public_key_base64(body).map_err(|e| e.to_string())?;
    Ok(CandidateKey {
        algorithm: algorithm.to_owned(),
        key,
    })
}

/// Lazy reader over a newline-delimited set of candidate public keys.
///
/// Yields keys in stream order, skipping blank lines. The first malformed
/// line (or I/O error) is yielded as an error and ends the iteration:
/// nothing after it is ever produced.
pub struct KeyReader<R> {
    lines: io::Lines<R>,
    line_no: usize,
    failed: bool,
}

impl<R: BufRead> KeyReader<R> {
    pub fn new(reader: R) -> Self {
        KeyReader {
            lines: reader.lines(),
            line_no: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for KeyReader<R> {
    type Item = Result<CandidateKey, KeyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => {
                    self.failed = true;
                    return Some(Err(KeyError::Io(err)));
                }
            };
            self.line_no += 1;
            let entry = line.trim();
            if entry.is_empty() {
                continue;
            }
            return match parse_candidate(entry) {
                Ok(key) => Some(Ok(key)),
                Err(reason) => {
                    self.failed = true;
                    Some(Err(KeyError::Malformed {
                        line: self.line_no,
                        content: entry.to_owned(),
                        reason,
                    }))
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn ed25519_line(comment: &str) -> String {
        let pair = key::KeyPair::generate_ed25519().unwrap();
        format!("ssh-ed25519 {} {}", pair.public_key_base64(), comment)
    }

    #[test]
    fn wellformed_lines_parse_in_order() {
        let input = format!("{}\n{}\n", ed25519_line("first@host"), ed25519_line("second@host"));
        let keys: Vec<_> = KeyReader::new(Cursor::new(input))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.algorithm() == "ssh-ed25519"));
    }

    #[test]
    fn blank_lines_yield_nothing() {
        let input = format!("\n{}\n\n   \n", ed25519_line("only@host"));
        let keys: Vec<_> = KeyReader::new(Cursor::new(input))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn reencoding_round_trips() {
        let pair = key::KeyPair::generate_ed25519().unwrap();
        let body = pair.public_key_base64();
        let line = format!("ssh-ed25519 {body} round@trip");
        let key = KeyReader::new(Cursor::new(line)).next().unwrap().unwrap();
        assert_eq!(key.algorithm(), "ssh-ed25519");
        assert_eq!(key.encoded(), body);
    }

    #[test]
    fn malformed_line_stops_the_scan() {
        let input = format!("{}\nnot-a-valid-key\n{}\n", ed25519_line("ok@host"), ed25519_line("never@host"));
        let mut reader = KeyReader::new(Cursor::new(input));

        assert!(reader.next().unwrap().is_ok());
        match reader.next().unwrap() {
            Err(KeyError::Malformed { line, content, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(content, "not-a-valid-key");
            }
            other => panic!("expected a malformed key error, got {other:?}"),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn missing_key_body_is_malformed() {
        let mut reader = KeyReader::new(Cursor::new("ssh-ed25519\n"));
        assert!(matches!(
            reader.next().unwrap(),
            Err(KeyError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn reads_a_file_on_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", ed25519_line("disk@host")).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", ed25519_line("disk2@host")).unwrap();

        let opened = std::fs::File::open(file.path()).unwrap();
        let keys: Vec<_> = KeyReader::new(io::BufReader::new(opened))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(keys.len(), 2);
    }
}
