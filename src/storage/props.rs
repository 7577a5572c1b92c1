//! Field-map encoding for record bodies and order-preserving value keys.

use crate::primitives::bytes::{buf::Cursor, ord, var};
use crate::types::{PenumbraError, RecordId, Result};

use super::types::{Fields, Value, ValueKind};

/// Encodes a field map as `count, (name, kind, payload)*` with varint framing.
pub fn encode_fields(fields: &Fields) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 * fields.len() + 1);
    var::encode_u64(fields.len() as u64, &mut out);
    for (name, value) in fields {
        var::encode_bytes(name.as_bytes(), &mut out);
        out.push(value.kind().tag());
        match value {
            Value::Str(s) => var::encode_bytes(s.as_bytes(), &mut out),
            Value::Int(v) => var::encode_i64(*v, &mut out),
            Value::Id(id) => var::encode_u64(id.0, &mut out),
        }
    }
    out
}

/// Inverse of [`encode_fields`].
pub fn decode_fields(buf: &[u8]) -> Result<Fields> {
    let mut cur = Cursor::new(buf);
    let count = cur.var_u64()?;
    let mut fields = Fields::new();
    for _ in 0..count {
        let name = utf8(cur.var_bytes()?)?;
        let kind = ValueKind::from_tag(cur.u8()?)
            .ok_or(PenumbraError::Corruption("unknown field kind tag"))?;
        let value = match kind {
            ValueKind::String => Value::Str(utf8(cur.var_bytes()?)?),
            ValueKind::Int => Value::Int(cur.var_i64()?),
            ValueKind::Id => Value::Id(RecordId(cur.var_u64()?)),
        };
        fields.insert(name, value);
    }
    if cur.remaining() != 0 {
        return Err(PenumbraError::Corruption("trailing bytes after record fields"));
    }
    Ok(fields)
}

/// Appends the memcomparable encoding of `value`: a kind tag followed by an
/// escaped string, a sign-flipped big-endian integer or a big-endian id.
pub fn push_value_key(dst: &mut Vec<u8>, value: &Value) {
    dst.push(value.kind().tag());
    match value {
        Value::Str(s) => ord::push_escaped(dst, s.as_bytes()),
        Value::Int(v) => ord::push_i64_be(dst, *v),
        Value::Id(id) => ord::push_u64_be(dst, id.0),
    }
}

/// Decodes a value key, returning the value and the encoded length.
pub fn split_value_key(src: &[u8]) -> Result<(Value, usize)> {
    let (&tag, rest) = src
        .split_first()
        .ok_or(PenumbraError::Corruption("value key truncated"))?;
    let kind =
        ValueKind::from_tag(tag).ok_or(PenumbraError::Corruption("unknown value key tag"))?;
    match kind {
        ValueKind::String => {
            let (bytes, used) = ord::split_escaped(rest)?;
            Ok((Value::Str(utf8(&bytes)?), 1 + used))
        }
        ValueKind::Int => Ok((Value::Int(ord::get_i64_be(rest)?), 9)),
        ValueKind::Id => Ok((Value::Id(RecordId(ord::get_u64_be(rest)?)), 9)),
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| PenumbraError::Corruption("invalid utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::fields;
    use proptest::prelude::*;

    #[test]
    fn fields_roundtrip_with_every_kind() {
        let mut map = fields([("name", "Ann\0ie")]);
        map.insert("age".into(), Value::Int(-31));
        map.insert("owner".into(), Value::Id(RecordId(77)));
        let buf = encode_fields(&map);
        assert_eq!(decode_fields(&buf).unwrap(), map);
    }

    #[test]
    fn truncated_body_is_corruption() {
        let buf = encode_fields(&fields([("k", "value")]));
        assert!(decode_fields(&buf[..buf.len() - 1]).is_err());
        let mut extra = buf.clone();
        extra.push(0);
        assert!(decode_fields(&extra).is_err());
    }

    #[test]
    fn value_key_split_reports_length() {
        let mut buf = Vec::new();
        push_value_key(&mut buf, &Value::Str("a\0b".into()));
        let encoded = buf.len();
        buf.extend_from_slice(&[9, 9]);
        let (value, used) = split_value_key(&buf).unwrap();
        assert_eq!(value, Value::Str("a\0b".into()));
        assert_eq!(used, encoded);
    }

    proptest! {
        #[test]
        fn string_keys_sort_like_strings(a in ".{0,12}", b in ".{0,12}") {
            let (mut ka, mut kb) = (Vec::new(), Vec::new());
            push_value_key(&mut ka, &Value::Str(a.clone()));
            push_value_key(&mut kb, &Value::Str(b.clone()));
            prop_assert_eq!(ka.cmp(&kb), a.as_bytes().cmp(b.as_bytes()));
        }

        #[test]
        fn int_keys_sort_like_ints(a in any::<i64>(), b in any::<i64>()) {
            let (mut ka, mut kb) = (Vec::new(), Vec::new());
            push_value_key(&mut ka, &Value::Int(a));
            push_value_key(&mut kb, &Value::Int(b));
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        }
    }
}
