use crate::types::DecodeError;

/// Largest long-form length marker accepted (0x84 = four length octets)
const MAX_LENGTH_OCTETS: usize = 4;

/// One decoded Tag-Length-Value block borrowing from the scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    /// Offset of the tag byte within the scanned buffer
    pub offset: usize,
    /// Offset of the first value byte within the scanned buffer
    pub value_offset: usize,
    pub value: &'a [u8],
}

impl Tlv<'_> {
    /// Offset just past this block
    pub fn end(&self) -> usize {
        self.value_offset + self.value.len()
    }
}

/// Decodes a tag and its BER length field at the specified position.
///
/// # Parameters
/// - `buffer`: The input byte slice containing the encoded data.
/// - `buffer_index`: The position of the tag byte.
///
/// # Returns
/// `(tag, length, value_position)` on success. The value itself is not bounds checked.
///
/// # Errors
/// - [`DecodeError::TrailingBytes`] if a tag byte is present without a length byte.
/// - [`DecodeError::MalformedTlv`] if a long-form marker lacks its length bytes,
///   or uses the indefinite or an unsupported form.
pub fn decode_tag_length(
    buffer: &[u8],
    buffer_index: usize,
) -> Result<(u8, usize, usize), DecodeError> {
    let remaining = buffer.len().saturating_sub(buffer_index);
    if remaining < 2 {
        return Err(DecodeError::TrailingBytes {
            offset: buffer_index,
            needed: 2,
            remaining,
        });
    }

    let tag = buffer[buffer_index];
    let first = buffer[buffer_index + 1];
    let mut pos = buffer_index + 2;

    if first < 0x80 {
        return Ok((tag, first as usize, pos));
    }

    let octets = (first & 0x7f) as usize;
    if octets == 0 {
        return Err(DecodeError::malformed(
            buffer_index,
            "indefinite length form is not supported",
        ));
    }
    if octets > MAX_LENGTH_OCTETS {
        return Err(DecodeError::malformed(
            buffer_index,
            format!("length uses {} octets", octets),
        ));
    }
    if pos + octets > buffer.len() {
        return Err(DecodeError::malformed(
            buffer_index,
            format!(
                "length marker 0x{:02x} without {} following length byte(s)",
                first, octets
            ),
        ));
    }

    let mut length = 0usize;
    for byte in &buffer[pos..pos + octets] {
        length = (length << 8) | *byte as usize;
    }
    pos += octets;
    Ok((tag, length, pos))
}

/// Decodes the TLV block starting at `buffer_index`.
///
/// # Errors
/// Everything [`decode_tag_length`] reports, plus [`DecodeError::MalformedTlv`]
/// when the declared length exceeds the remaining buffer.
pub fn decode_tlv_at(buffer: &[u8], buffer_index: usize) -> Result<Tlv<'_>, DecodeError> {
    let (tag, length, value_offset) = decode_tag_length(buffer, buffer_index)?;
    let available = buffer.len() - value_offset;
    if length > available {
        return Err(DecodeError::malformed(
            buffer_index,
            format!(
                "declared length {} exceeds remaining {} byte(s)",
                length, available
            ),
        ));
    }
    Ok(Tlv {
        tag,
        offset: buffer_index,
        value_offset,
        value: &buffer[value_offset..value_offset + length],
    })
}

/// Decodes the TLV block at the start of `buffer`.
pub fn decode_tlv(buffer: &[u8]) -> Result<Tlv<'_>, DecodeError> {
    decode_tlv_at(buffer, 0)
}

/// Lazy scan over consecutive TLV blocks.
///
/// Yields `None` once the buffer is consumed exactly. On the first error the
/// error is yielded and the scan ends. Cloning or calling
/// [`TlvScanner::rewind`] restarts the scan without copying the buffer.
#[derive(Debug, Clone)]
pub struct TlvScanner<'a> {
    buffer: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> TlvScanner<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        TlvScanner {
            buffer,
            pos: 0,
            failed: false,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
        self.failed = false;
    }
}

impl<'a> Iterator for TlvScanner<'a> {
    type Item = Result<Tlv<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buffer.len() {
            return None;
        }
        match decode_tlv_at(self.buffer, self.pos) {
            Ok(tlv) => {
                self.pos = tlv.end();
                Some(Ok(tlv))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Decodes a VisibleString value. Bytes outside UTF-8 are replaced.
pub fn decode_string(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

/// Decodes a BER BOOLEAN value; any non-zero byte is true.
pub fn decode_boolean(value: &[u8]) -> bool {
    value.iter().any(|b| *b != 0)
}

/// Decodes a BER encoded unsigned integer into a u32.
///
/// # Parameters
/// - `value`: The integer content bytes (big-endian, optional leading zero).
/// - `offset`: Position of the value in the original buffer, used in errors.
///
/// # Errors
/// [`DecodeError::MalformedTlv`] if the value does not fit in 32 bits.
pub fn decode_unsigned_32(value: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let significant = match value.iter().position(|b| *b != 0) {
        Some(start) => &value[start..],
        None => return Ok(0),
    };
    if significant.len() > 4 {
        return Err(DecodeError::malformed(
            offset,
            format!("unsigned integer of {} bytes exceeds 32 bits", value.len()),
        ));
    }
    let mut out = 0u32;
    for byte in significant {
        out = (out << 8) | *byte as u32;
    }
    Ok(out)
}

/// Decodes a BER encoded two's complement integer into an i64.
pub fn decode_integer_64(value: &[u8], offset: usize) -> Result<i64, DecodeError> {
    if value.is_empty() {
        return Ok(0);
    }
    if value.len() > 8 {
        return Err(DecodeError::malformed(
            offset,
            format!("integer of {} bytes exceeds 64 bits", value.len()),
        ));
    }
    // Sign extension: 0xFF for negative, 0x00 for positive
    let fill = if value[0] & 0x80 == 0x80 { 0xff } else { 0x00 };
    let mut bytes = [fill; 8];
    bytes[8 - value.len()..].copy_from_slice(value);
    Ok(i64::from_be_bytes(bytes))
}
