use crate::{codec::skip_whitespace, errors::ChunkFramingError};
use bytes::BytesMut;

/// A decoded chunk-size line. `line_len` covers the size digits, any chunk
/// extensions, and the terminating CRLF; the payload (if `size > 0`) follows
/// immediately and must itself be terminated by CRLF.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ChunkLine {
    pub size: usize,
    pub line_len: usize,
    pub ieof: bool,
}

#[inline]
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

/// Decodes one chunk-size line from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a prefix of the line (more
/// bytes must be read first). A size line carrying non-hex size characters or
/// a malformed extension fails with [`ChunkFramingError`]. The `ieof`
/// extension marks the end of a preview that covers the whole body.
pub fn parse_chunk_line(buf: &[u8]) -> Result<Option<ChunkLine>, ChunkFramingError> {
    let mut i = 0;
    skip_whitespace(buf, &mut i);

    let size_start = i;
    while i < buf.len() && buf[i].is_ascii_hexdigit() {
        i += 1;
    }
    if i == buf.len() {
        return Ok(None);
    }
    if i == size_start {
        return Err(ChunkFramingError("missing chunk size"));
    }
    // hex digits only, checked above
    let size_str = std::str::from_utf8(&buf[size_start..i])
        .map_err(|_| ChunkFramingError("bad chunk size"))?;
    let size = usize::from_str_radix(size_str, 16)
        .map_err(|_| ChunkFramingError("chunk size out of range"))?;

    let mut ieof = false;
    loop {
        skip_whitespace(buf, &mut i);
        if i == buf.len() {
            return Ok(None);
        }
        match buf[i] {
            b'\r' => {
                if i + 1 == buf.len() {
                    return Ok(None);
                }
                if buf[i + 1] != b'\n' {
                    return Err(ChunkFramingError("CR without LF in size line"));
                }
                return Ok(Some(ChunkLine {
                    size,
                    line_len: i + 2,
                    ieof,
                }));
            }
            b';' => {
                i += 1;
                skip_whitespace(buf, &mut i);
                let name_start = i;
                while i < buf.len() && is_token_byte(buf[i]) {
                    i += 1;
                }
                if i == buf.len() {
                    return Ok(None);
                }
                if i == name_start {
                    return Err(ChunkFramingError("empty chunk extension"));
                }
                if &buf[name_start..i] == b"ieof" {
                    ieof = true;
                }

                skip_whitespace(buf, &mut i);
                if i < buf.len() && buf[i] == b'=' {
                    i += 1;
                    skip_whitespace(buf, &mut i);
                    if i == buf.len() {
                        return Ok(None);
                    }
                    if buf[i] == b'"' {
                        i += 1;
                        while i < buf.len() && buf[i] != b'"' {
                            if buf[i] == b'\\' {
                                i += 1; // quoted-pair
                            }
                            i += 1;
                        }
                        if i >= buf.len() {
                            return Ok(None);
                        }
                        i += 1;
                    } else {
                        let val_start = i;
                        while i < buf.len() && is_token_byte(buf[i]) {
                            i += 1;
                        }
                        if i == val_start {
                            return Err(ChunkFramingError("bad chunk extension value"));
                        }
                        if i == buf.len() {
                            return Ok(None);
                        }
                    }
                }
            }
            _ => return Err(ChunkFramingError("bad chunk size line")),
        }
    }
}

/// Emits one chunk: hex length, CRLF, payload, CRLF. An empty payload emits
/// the terminal chunk form.
pub fn encode_chunk(buf: &mut BytesMut, payload: &[u8]) {
    if payload.is_empty() {
        encode_last_chunk(buf);
        return;
    }
    buf.extend_from_slice(format!("{:X}\r\n", payload.len()).as_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(b"\r\n");
}

/// Emits the terminal zero chunk that ends a chunked body.
pub fn encode_last_chunk(buf: &mut BytesMut) {
    buf.extend_from_slice(b"0\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_lines() {
        let partial: Vec<&[u8]> = vec![
            b"",
            b"0",
            b" 0",
            b"  0  ",
            b"1ab",
            b"0; ieof",
            b"0 ; ieof ",
            b"5; key",
            b"5; key=",
            b"5; key=\"unclosed",
            b"5\r",
        ];
        for e in &partial {
            assert_eq!(parse_chunk_line(e).unwrap(), None, "input: {:?}", e);
        }
    }

    #[test]
    fn test_complete_lines() {
        let some: Vec<(&[u8], usize, bool)> = vec![
            (b"0\r\n", 0, false),
            (b"ab\r\n", 0xAB, false),
            (b" ab \r\n", 0xAB, false),
            (b"bC\r\n", 0xBC, false),
            (b"bcdef\r\n", 0xBCDEF, false),
            (b"0; ieof\r\n", 0, true),
            (b"5; koko=popo; ieof; zozo\r\n", 5, true),
            (b"5; koko = popo; zozo\r\n", 5, false),
            (b"0; key=\"val; ieof\"\r\n", 0, false),
            (b"0; key=\"x\\\"y\"; ieof\r\n", 0, true),
            (b"10; key=val\r\n", 16, false),
        ];
        for (input, size, ieof) in &some {
            let line = parse_chunk_line(input).unwrap().unwrap();
            assert_eq!(line.size, *size, "input: {:?}", input);
            assert_eq!(line.line_len, input.len(), "input: {:?}", input);
            assert_eq!(line.ieof, *ieof, "input: {:?}", input);
        }
    }

    #[test]
    fn test_line_len_stops_at_crlf() {
        let line = parse_chunk_line(b"5\r\nabcde\r\n").unwrap().unwrap();
        assert_eq!(line.size, 5);
        assert_eq!(line.line_len, 3);

        let line = parse_chunk_line(b"2; ieof\r\nAB\r\n").unwrap().unwrap();
        assert_eq!(line.size, 2);
        assert_eq!(line.line_len, 9);
        assert!(line.ieof);
    }

    #[test]
    fn test_bad_lines() {
        let bad: Vec<&[u8]> = vec![
            b";\r\n",
            b"zz\r\n",
            b"0;\r\n",
            b"0; \r\n",
            b"0; key=;\r\n",
            b"5\rX",
            b"10;\rkey=val",
            b"\r\n",
            b" \r\n",
            b"ffffffffffffffffffff\r\n", // overflows usize
        ];
        for e in &bad {
            assert!(parse_chunk_line(e).is_err(), "input: {:?}", e);
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let payloads: Vec<&[u8]> = vec![b"hello", b"\x00\xff\x01", b"x"];
        let mut buf = BytesMut::new();
        for p in &payloads {
            encode_chunk(&mut buf, p);
        }
        encode_last_chunk(&mut buf);

        let mut rest = &buf[..];
        let mut decoded: Vec<Vec<u8>> = Vec::new();
        loop {
            let line = parse_chunk_line(rest).unwrap().unwrap();
            if line.size == 0 {
                assert_eq!(&rest[line.line_len..], b"\r\n");
                break;
            }
            let payload = &rest[line.line_len..line.line_len + line.size];
            decoded.push(payload.to_vec());
            assert_eq!(&rest[line.line_len + line.size..line.line_len + line.size + 2], b"\r\n");
            rest = &rest[line.line_len + line.size + 2..];
        }
        assert_eq!(decoded, payloads.iter().map(|p| p.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_payload_is_terminal() {
        let mut a = BytesMut::new();
        encode_chunk(&mut a, b"");
        let mut b = BytesMut::new();
        encode_last_chunk(&mut b);
        assert_eq!(a, b);
        assert_eq!(&a[..], b"0\r\n\r\n");
    }
}
