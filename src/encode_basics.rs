/// Returns the number of bytes required to encode the length field in ASN.1 BER format.
///
/// This function determines how many bytes are needed to represent the given length value
/// according to BER rules:
/// - 1 byte for values < 128 (short form)
/// - 2 bytes for values < 256 (0x81 + 1 byte)
/// - 3 bytes for values < 65536 (0x82 + 2 bytes)
/// - one marker byte plus the minimal big-endian length bytes beyond that
pub fn size_length(value: usize) -> usize {
    if value < 0x80 {
        1
    } else {
        1 + minimal_length_octets(value)
    }
}

fn minimal_length_octets(value: usize) -> usize {
    let bits = usize::BITS - value.leading_zeros();
    bits.div_ceil(8).max(1) as usize
}

/// Appends a BER length field in its minimal form.
///
/// # Parameters
/// - `value`: The length value to encode.
/// - `buffer`: The output buffer, extended in place.
pub fn encode_length(value: usize, buffer: &mut Vec<u8>) {
    if value < 0x80 {
        buffer.push(value as u8);
        return;
    }
    let octets = minimal_length_octets(value);
    buffer.push(0x80 | octets as u8);
    let bytes = value.to_be_bytes();
    buffer.extend_from_slice(&bytes[bytes.len() - octets..]);
}

/// Appends an ASN.1 tag and its length field using BER rules.
///
/// # Parameters
/// - `tag`: The ASN.1 tag to write.
/// - `value`: The length value to encode.
/// - `buffer`: The output buffer, extended in place.
pub fn encode_tag_length(tag: u8, value: usize, buffer: &mut Vec<u8>) {
    buffer.push(tag);
    encode_length(value, buffer);
}

/// Appends an ASN.1 BER element (tag, length, value) to the buffer.
///
/// Any byte sequence is a legal value, so this never fails.
///
/// # Parameters
/// - `tag`: The ASN.1 tag to write.
/// - `value`: The value bytes to encode.
/// - `buffer`: The output buffer, extended in place.
pub fn encode_ber(tag: u8, value: &[u8], buffer: &mut Vec<u8>) {
    buffer.reserve(1 + size_length(value.len()) + value.len());
    encode_tag_length(tag, value.len(), buffer);
    buffer.extend_from_slice(value);
}

/// Encodes a single TLV block into a fresh buffer.
pub fn encode_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(1 + size_length(value.len()) + value.len());
    encode_ber(tag, value, &mut buffer);
    buffer
}

/// # Parameters
/// - `tag`: A `u8` representing the tag to be written to the buffer.
/// - `value`: A `bool` indicating the value to encode (true as 0xff, false as 0x00).
/// - `buffer`: The output buffer, extended in place.
pub fn encode_boolean(tag: u8, value: bool, buffer: &mut Vec<u8>) {
    encode_ber(tag, &[if value { 0xff } else { 0x00 }], buffer);
}

/// Encodes a VisibleString. The string bytes are written as-is.
pub fn encode_string(tag: u8, value: &str, buffer: &mut Vec<u8>) {
    encode_ber(tag, value.as_bytes(), buffer);
}

/// Encodes an octet string using BER rules.
pub fn encode_octet_string(tag: u8, value: &[u8], buffer: &mut Vec<u8>) {
    encode_ber(tag, value, buffer);
}

/// Returns the minimal BER representation of an unsigned value: leading zero
/// bytes stripped, with one zero byte put back when the MSB is set so the
/// value stays positive.
pub fn minimal_unsigned_bytes(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 && bytes[start] == 0x00 {
        start += 1;
    }
    let minimal = &bytes[start..];
    let mut out = Vec::with_capacity(minimal.len() + 1);
    if minimal[0] & 0x80 != 0 {
        out.push(0x00);
    }
    out.extend_from_slice(minimal);
    out
}

/// Encodes an unsigned integer in minimal ASN.1 BER form.
///
/// # Parameters
/// - `tag`: A `u8` representing the ASN.1 tag for the unsigned integer type.
/// - `value`: The unsigned integer.
/// - `buffer`: The output buffer, extended in place.
pub fn encode_unsigned_integer(tag: u8, value: u32, buffer: &mut Vec<u8>) {
    encode_ber(tag, &minimal_unsigned_bytes(value), buffer);
}
