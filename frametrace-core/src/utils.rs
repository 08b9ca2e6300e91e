//! Host utility capability
//!
//! Thread ids and UTF-16 → UTF-8 conversion, behind a trait so that a host
//! can substitute its own implementation. Conversion never fails: output is
//! truncated to [`UTF8_BUFFER_CAPACITY`] bytes (terminator included) and a
//! malformed input yields an empty string.

use std::os::raw::c_char;

/// Size of a converted string buffer, terminator included
pub const UTF8_BUFFER_CAPACITY: usize = 128;

/// Fixed-size, NUL-terminated UTF-8 string
#[derive(Clone, Copy)]
pub struct Utf8Buffer {
    bytes: [u8; UTF8_BUFFER_CAPACITY],
    len: usize,
}

impl Utf8Buffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; UTF8_BUFFER_CAPACITY],
            len: 0,
        }
    }

    /// Copy `input`, truncating on a character boundary
    pub fn from_str_truncated(input: &str) -> Self {
        let mut buffer = Self::new();
        for ch in input.chars() {
            if !buffer.push(ch) {
                break;
            }
        }
        buffer
    }

    /// Append a character; false once it would not fit
    pub fn push(&mut self, ch: char) -> bool {
        let width = ch.len_utf8();
        if self.len + width > UTF8_BUFFER_CAPACITY - 1 {
            return false;
        }
        ch.encode_utf8(&mut self.bytes[self.len..self.len + width]);
        self.len += width;
        true
    }

    pub fn clear(&mut self) {
        self.bytes = [0; UTF8_BUFFER_CAPACITY];
        self.len = 0;
    }

    pub fn as_str(&self) -> &str {
        // Only whole characters are ever pushed.
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }

    /// Pointer to the NUL-terminated bytes
    pub fn as_c_ptr(&self) -> *const c_char {
        self.bytes.as_ptr().cast()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Utf8Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Utf8Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Utf8Buffer").field(&self.as_str()).finish()
    }
}

/// Decode UTF-16 into a bounded buffer
///
/// Stops at the first NUL unit. Any unpaired surrogate makes the whole
/// result empty.
pub fn decode_utf16(input: &[u16]) -> Utf8Buffer {
    let mut buffer = Utf8Buffer::new();
    let units = input.iter().copied().take_while(|&unit| unit != 0);
    for decoded in char::decode_utf16(units) {
        match decoded {
            Ok(ch) => {
                if !buffer.push(ch) {
                    break;
                }
            }
            Err(_) => {
                buffer.clear();
                break;
            }
        }
    }
    buffer
}

/// Reinterpret a raw byte payload as native-endian UTF-16 units
///
/// Returns the number of units written to `out`; a trailing odd byte is
/// ignored. When `out` is too small, the copy never ends on the first half
/// of a surrogate pair.
pub fn utf16_units(bytes: &[u8], out: &mut [u16]) -> usize {
    let mut written = 0;
    for (unit, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *unit = u16::from_ne_bytes([pair[0], pair[1]]);
        written += 1;
    }
    let truncated = bytes.len() / 2 > written;
    if truncated && written > 0 && is_high_surrogate(out[written - 1]) {
        written -= 1;
    }
    written
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xd800..=0xdbff).contains(&unit)
}

/// Thread id and string conversion services
pub trait HostUtils: Send + Sync {
    /// Id of the calling thread
    fn thread_id(&self) -> u64;

    fn utf16_to_utf8(&self, input: &[u16]) -> Utf8Buffer;

    /// Release owned resources on plugin unload
    fn unload(&self) {}
}

/// Default utilities backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUtils;

impl HostUtils for SystemUtils {
    fn thread_id(&self) -> u64 {
        current_thread_id()
    }

    fn utf16_to_utf8(&self, input: &[u16]) -> Utf8Buffer {
        decode_utf16(input)
    }
}

/// Id of the calling thread as the OS tracer sees it
#[cfg(unix)]
pub fn current_thread_id() -> u64 {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() as u64 }
}

#[cfg(not(unix))]
pub fn current_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_decode_ascii_and_multibyte() {
        assert_eq!(decode_utf16(&utf16("LoadScene")).as_str(), "LoadScene");
        assert_eq!(decode_utf16(&utf16("ロード")).as_str(), "ロード");
    }

    #[test]
    fn test_decode_stops_at_nul() {
        let mut units = utf16("Tick");
        units.push(0);
        units.extend(utf16("garbage"));
        assert_eq!(decode_utf16(&units).as_str(), "Tick");
    }

    #[test]
    fn test_decode_truncates_to_capacity() {
        let long = "a".repeat(500);
        let buffer = decode_utf16(&utf16(&long));
        assert_eq!(buffer.len(), UTF8_BUFFER_CAPACITY - 1);
        let terminator = unsafe { *buffer.as_c_ptr().add(buffer.len()) };
        assert_eq!(terminator, 0);
    }

    #[test]
    fn test_malformed_input_yields_empty() {
        let units = [0x0041, 0xd800, 0x0042];
        assert!(decode_utf16(&units).is_empty());
    }

    #[test]
    fn test_units_from_bytes() {
        let bytes: Vec<u8> = utf16("Hi").iter().flat_map(|u| u.to_ne_bytes()).collect();
        let mut out = [0u16; 8];
        let n = utf16_units(&bytes, &mut out);
        assert_eq!(n, 2);
        assert_eq!(decode_utf16(&out[..n]).as_str(), "Hi");
    }

    #[test]
    fn test_units_never_split_a_surrogate_pair() {
        let text = format!("{}😀", "a".repeat(127));
        let bytes: Vec<u8> = utf16(&text).iter().flat_map(|u| u.to_ne_bytes()).collect();
        let mut out = [0u16; UTF8_BUFFER_CAPACITY];

        let n = utf16_units(&bytes, &mut out);
        assert_eq!(n, 127);
        assert_eq!(decode_utf16(&out[..n]).as_str(), "a".repeat(127));

        // A pair that fits whole is kept.
        let mut wide = [0u16; 129];
        assert_eq!(utf16_units(&bytes, &mut wide), 129);
    }

    #[test]
    fn test_thread_ids_differ_across_threads() {
        let here = SystemUtils.thread_id();
        let there = std::thread::spawn(|| SystemUtils.thread_id()).join().unwrap();
        assert_eq!(here, SystemUtils.thread_id());
        assert_ne!(here, there);
    }

    #[test]
    fn test_from_str_truncated() {
        let buffer = Utf8Buffer::from_str_truncated(&"é".repeat(100));
        assert_eq!(buffer.len(), 126);
        assert_eq!(buffer.as_str().chars().count(), 63);
    }
}
