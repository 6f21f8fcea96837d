//! The signable encoding of a record.
//!
//! A record is signed over the [bencode] serialization of the dictionary
//! `{ "salt": salt, "seq": seq, "v": value }` with the enclosing `d` and `e` removed, the
//! same form [BEP44] mutable items use.  Dictionary keys are written in sorted order, so a
//! salt, when present, comes first.  The `salt` entry is omitted entirely when there is no
//! salt, which keeps the salted and unsalted encodings of the same `(seq, value)` distinct.
//!
//! Every integer is written as `i<decimal>e` and every byte string as `<len>:<bytes>`, so
//! the encoding is injective: no two distinct inputs produce the same bytes.
//!
//! [bencode]: https://www.bittorrent.org/beps/bep_0003.html#bencoding
//! [BEP44]: https://www.bittorrent.org/beps/bep_0044.html

/// Encodes the signable form of a record.
///
/// This is what gets signed on publish and what is reconstructed to verify a record on
/// resolve, both paths must go through this function.
pub fn encode_signable(seq: u64, value: &[u8], salt: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + salt.map_or(0, <[u8]>::len) + 48);
    if let Some(salt) = salt {
        put_bytes(&mut out, b"salt");
        put_bytes(&mut out, salt);
    }
    put_bytes(&mut out, b"seq");
    put_int(&mut out, seq);
    put_bytes(&mut out, b"v");
    put_bytes(&mut out, value);
    out
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn put_int(out: &mut Vec<u8>, n: u64) {
    out.push(b'i');
    out.extend_from_slice(n.to_string().as_bytes());
    out.push(b'e');
}
