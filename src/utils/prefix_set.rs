//! Compact trie encoding for sets of strings and string-keyed maps of small integers.
//!
//! Passes ship lists of class or package prefixes (block lists, hot-class hints) in this
//! form: it is a flat byte string with no NUL bytes and no ASCII control characters, so it
//! can be embedded into configuration values and string constants unchanged.
//!
//! # Layout
//!
//! The buffer is a pre-order serialisation of a byte trie, root first. Every node is:
//!
//! ```text
//! header   1 byte   0x80 | NONTERMINAL(0x40)? | NO_PAYLOAD(0x20)? | payload units (3 bits)
//! payload  n bytes  0x80 | 7-bit chunk, least significant chunk first (terminal nodes only)
//! count    2 bytes  number of children, base-127 digits, each digit + 1
//! children count × (edge byte, offset as 3 base-127 digits each + 1)
//! ```
//!
//! Offsets are absolute positions of the child node within the buffer and always point
//! forward, which makes decoding of damaged input terminate. Keys must not contain NUL.
//!
//! # Example
//!
//! ```rust
//! use dexopt::utils::prefix_set::{self, PrefixSetView};
//!
//! let encoded = prefix_set::encode_set(["Landroid/", "Ljava/", "Ljava/lang/"])?;
//! let view = PrefixSetView::new(&encoded);
//!
//! assert_eq!(view.longest_prefix("Ljava/lang/String;")?, Some((11, None)));
//! assert_eq!(view.longest_prefix("Lcom/example/Foo;")?, None);
//! assert_eq!(prefix_set::decode(&encoded)?.len(), 3);
//! # Ok::<(), dexopt::Error>(())
//! ```

use std::collections::BTreeMap;

use crate::{utils::Parser, Result};

/// The node does not terminate a key.
pub const NONTERMINAL: u8 = 0x40;
/// The node carries no payload bytes.
pub const NO_PAYLOAD: u8 = 0x20;
/// Mask of the payload-unit count.
pub const PAYLOAD_UNITS_MASK: u8 = 0x07;

const HEADER_BASE: u8 = 0x80;
const DIGIT_BASE: u32 = 127;
const OFFSET_DIGITS: usize = 3;
const COUNT_DIGITS: usize = 2;
const MAX_PAYLOAD_UNITS: usize = 5;

/// Largest offset that fits into three base-127 digits.
pub const MAX_OFFSET: u32 = DIGIT_BASE * DIGIT_BASE * DIGIT_BASE - 1;

#[derive(Default)]
struct TrieNode {
    value: Option<Option<u32>>,
    children: BTreeMap<u8, TrieNode>,
}

impl TrieNode {
    fn insert(&mut self, key: &[u8], value: Option<u32>) {
        let mut node = self;
        for &b in key {
            node = node.children.entry(b).or_default();
        }
        node.value = Some(value);
    }
}

/// Encodes a set of strings.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a key contains NUL or the encoding exceeds the
/// offset range.
pub fn encode_set<I, S>(keys: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut root = TrieNode::default();
    for key in keys {
        check_key(key.as_ref())?;
        root.insert(key.as_ref().as_bytes(), None);
    }
    encode_trie(&root)
}

/// Encodes a map from strings to small integers.
///
/// # Errors
///
/// Same as [`encode_set`].
pub fn encode_map<I, S>(entries: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (S, u32)>,
    S: AsRef<str>,
{
    let mut root = TrieNode::default();
    for (key, value) in entries {
        check_key(key.as_ref())?;
        root.insert(key.as_ref().as_bytes(), Some(value));
    }
    encode_trie(&root)
}

/// Decodes an encoded set or map. Set members map to `None`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] or [`crate::Error::OutOfBounds`] for damaged input.
pub fn decode(data: &[u8]) -> Result<BTreeMap<String, Option<u32>>> {
    let mut out = BTreeMap::new();
    if data.is_empty() {
        return Ok(out);
    }
    let mut key = Vec::new();
    decode_node(data, 0, &mut key, &mut out)?;
    Ok(out)
}

fn check_key(key: &str) -> Result<()> {
    if key.as_bytes().contains(&0) {
        return Err(malformed_error!("prefix-set key {:?} contains NUL", key));
    }
    Ok(())
}

fn encode_trie(root: &TrieNode) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    encode_node(root, &mut out)?;
    Ok(out)
}

#[allow(clippy::cast_possible_truncation)]
fn encode_node(node: &TrieNode, out: &mut Vec<u8>) -> Result<()> {
    let mut header = HEADER_BASE;
    let mut payload = Vec::new();
    match node.value {
        None => header |= NONTERMINAL | NO_PAYLOAD,
        Some(None) => header |= NO_PAYLOAD,
        Some(Some(mut value)) => loop {
            payload.push(HEADER_BASE | (value & 0x7f) as u8);
            value >>= 7;
            if value == 0 {
                break;
            }
        },
    }
    let units = payload.len() as u8;
    out.push(header | (units & PAYLOAD_UNITS_MASK));
    out.extend_from_slice(&payload);

    let child_count = node.children.len() as u32;
    push_digits(out, child_count, COUNT_DIGITS)?;
    let mut slots = Vec::with_capacity(node.children.len());
    for &edge in node.children.keys() {
        out.push(edge);
        slots.push(out.len());
        out.extend_from_slice(&[1; OFFSET_DIGITS]);
    }

    for (child, slot) in node.children.values().zip(slots) {
        let offset = u32::try_from(out.len())
            .ok()
            .filter(|&o| o <= MAX_OFFSET)
            .ok_or_else(|| malformed_error!("prefix-set encoding exceeds {} bytes", MAX_OFFSET))?;
        let mut digits = Vec::with_capacity(OFFSET_DIGITS);
        push_digits(&mut digits, offset, OFFSET_DIGITS)?;
        out[slot..slot + OFFSET_DIGITS].copy_from_slice(&digits);
        encode_node(child, out)?;
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)]
fn push_digits(out: &mut Vec<u8>, mut value: u32, digits: usize) -> Result<()> {
    let start = out.len();
    for _ in 0..digits {
        out.push((value % DIGIT_BASE) as u8 + 1);
        value /= DIGIT_BASE;
    }
    if value != 0 {
        out.truncate(start);
        return Err(malformed_error!("value does not fit in {} base-127 digits", digits));
    }
    // Most significant digit first.
    out[start..].reverse();
    Ok(())
}

fn read_digits(parser: &mut Parser<'_>, digits: usize) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..digits {
        let byte = parser.read_u8()?;
        if byte == 0 || u32::from(byte) > DIGIT_BASE {
            return Err(malformed_error!("invalid base-127 digit 0x{:02x}", byte));
        }
        value = value * DIGIT_BASE + u32::from(byte - 1);
    }
    Ok(value)
}

/// A decoded node header.
struct NodeHeader {
    value: Option<Option<u32>>,
    children_at: usize,
    child_count: u32,
}

fn read_node(data: &[u8], offset: usize) -> Result<NodeHeader> {
    let mut parser = Parser::new(data);
    parser.seek(offset)?;
    let header = parser.read_u8()?;
    if header & HEADER_BASE == 0 {
        return Err(malformed_error!("invalid prefix-set node header 0x{:02x}", header));
    }
    let units = usize::from(header & PAYLOAD_UNITS_MASK);
    if units > MAX_PAYLOAD_UNITS {
        return Err(malformed_error!("{} payload units exceed the maximum of 5", units));
    }
    let mut payload = 0u64;
    for i in 0..units {
        let byte = parser.read_u8()?;
        if byte & HEADER_BASE == 0 {
            return Err(malformed_error!("payload byte 0x{:02x} lacks the high bit", byte));
        }
        payload |= u64::from(byte & 0x7f) << (7 * i);
    }
    let payload = u32::try_from(payload)
        .map_err(|_| malformed_error!("prefix-set payload exceeds 32 bits"))?;

    let value = if header & NONTERMINAL != 0 {
        None
    } else if header & NO_PAYLOAD != 0 {
        Some(None)
    } else {
        Some(Some(payload))
    };
    let child_count = read_digits(&mut parser, COUNT_DIGITS)?;
    Ok(NodeHeader {
        value,
        children_at: parser.pos(),
        child_count,
    })
}

fn read_child(data: &[u8], at: usize, parent: usize) -> Result<(u8, usize, usize)> {
    let mut parser = Parser::new(data);
    parser.seek(at)?;
    let edge = parser.read_u8()?;
    let target = read_digits(&mut parser, OFFSET_DIGITS)? as usize;
    if target <= parent || target >= data.len() {
        return Err(malformed_error!(
            "prefix-set child offset {} is not after its parent at {}",
            target,
            parent
        ));
    }
    Ok((edge, target, parser.pos()))
}

fn decode_node(
    data: &[u8],
    offset: usize,
    key: &mut Vec<u8>,
    out: &mut BTreeMap<String, Option<u32>>,
) -> Result<()> {
    let node = read_node(data, offset)?;
    if let Some(value) = node.value {
        let text = String::from_utf8(key.clone())
            .map_err(|_| malformed_error!("prefix-set key is not valid UTF-8"))?;
        out.insert(text, value);
    }
    let mut at = node.children_at;
    for _ in 0..node.child_count {
        let (edge, target, next) = read_child(data, at, offset)?;
        key.push(edge);
        decode_node(data, target, key, out)?;
        key.pop();
        at = next;
    }
    Ok(())
}

/// Lookup over an encoded buffer without decoding it.
#[derive(Clone, Copy)]
pub struct PrefixSetView<'a> {
    data: &'a [u8],
}

impl<'a> PrefixSetView<'a> {
    /// Wraps an encoded buffer.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        PrefixSetView { data }
    }

    /// Returns the value stored for exactly `key`: `Some(None)` for a set member,
    /// `Some(Some(v))` for a map entry, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is damaged along the lookup path.
    pub fn get(&self, key: &str) -> Result<Option<Option<u32>>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let mut offset = 0;
        for &b in key.as_bytes() {
            match self.find_child(offset, b)? {
                Some(next) => offset = next,
                None => return Ok(None),
            }
        }
        Ok(read_node(self.data, offset)?.value)
    }

    /// Returns `true` if `key` is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is damaged along the lookup path.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Finds the longest stored key that is a prefix of `text`, returning its length and
    /// value.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is damaged along the lookup path.
    pub fn longest_prefix(&self, text: &str) -> Result<Option<(usize, Option<u32>)>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let mut offset = 0;
        let mut best = read_node(self.data, 0)?.value.map(|v| (0, v));
        for (i, &b) in text.as_bytes().iter().enumerate() {
            match self.find_child(offset, b)? {
                Some(next) => {
                    offset = next;
                    if let Some(value) = read_node(self.data, offset)?.value {
                        best = Some((i + 1, value));
                    }
                }
                None => break,
            }
        }
        Ok(best)
    }

    fn find_child(&self, offset: usize, edge: u8) -> Result<Option<usize>> {
        let node = read_node(self.data, offset)?;
        let mut at = node.children_at;
        for _ in 0..node.child_count {
            let (child_edge, target, next) = read_child(self.data, at, offset)?;
            if child_edge == edge {
                return Ok(Some(target));
            }
            at = next;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_decodes_to_members() -> crate::Result<()> {
        let keys = ["Lcom/a/", "Lcom/ab/", "Lorg/"];
        let encoded = encode_set(keys)?;
        let decoded = decode(&encoded)?;
        assert_eq!(
            decoded.keys().map(String::as_str).collect::<Vec<_>>(),
            keys.to_vec()
        );
        assert!(decoded.values().all(Option::is_none));
        Ok(())
    }

    #[test]
    fn encoding_has_no_nul_or_control_bytes() -> crate::Result<()> {
        let encoded = encode_map([("a", 0u32), ("abc", 1_000_000), ("b", 127)])?;
        assert!(encoded.iter().all(|&b| b >= 1));
        // Headers and payload bytes always have the high bit set.
        assert_eq!(encoded[0] & 0x80, 0x80);
        Ok(())
    }

    #[test]
    fn map_values_survive() -> crate::Result<()> {
        let encoded = encode_map([("x", 5u32), ("xy", u32::MAX), ("z", 0)])?;
        let decoded = decode(&encoded)?;
        assert_eq!(decoded.get("x"), Some(&Some(5)));
        assert_eq!(decoded.get("xy"), Some(&Some(u32::MAX)));
        assert_eq!(decoded.get("z"), Some(&Some(0)));

        let view = PrefixSetView::new(&encoded);
        assert_eq!(view.get("xy")?, Some(Some(u32::MAX)));
        assert_eq!(view.get("xz")?, None);
        Ok(())
    }

    #[test]
    fn encoding_is_deterministic() -> crate::Result<()> {
        let a = encode_set(["b", "a", "ab"])?;
        let b = encode_set(["ab", "b", "a"])?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn empty_key_and_empty_set() -> crate::Result<()> {
        let empty = encode_set(Vec::<String>::new())?;
        assert!(decode(&empty)?.is_empty());

        let with_root = encode_set([""])?;
        let view = PrefixSetView::new(&with_root);
        assert_eq!(view.longest_prefix("anything")?, Some((0, None)));
        Ok(())
    }

    #[test]
    fn rejects_backward_offsets() {
        // Root with one child whose offset points at the root itself.
        let data = [0x80 | NONTERMINAL | NO_PAYLOAD, 1, 2, b'a', 1, 1, 1];
        assert!(decode(&data).is_err());
    }

    #[test]
    fn rejects_nul_keys() {
        assert!(encode_set(["a\0b"]).is_err());
    }
}
