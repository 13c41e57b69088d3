//! 📦 record.rs — one line of export, one Record, no survivors.
//!
//! 🎬 *[INT. A TABLE EXPORT — somewhere around line 4,000,000]*
//!
//! Every line of the dump is a JSON object. Every attribute is a tagged
//! value wearing its type on its sleeve: `{"S": "..."}` for strings,
//! `{"N": "..."}` for numbers-that-are-secretly-strings (DynamoDB's
//! greatest prank), and `{"B": "..."}` for binary data that arrives in
//! base64 formal wear and must be undressed back to raw bytes before
//! we ship it anywhere.
//!
//! 🧠 Knowledge graph:
//! - **Binary restore**: `B` is the ONLY tag we rewrite. base64 string
//!   or array-of-bytes in → `Vec<u8>` out. Everything else passes
//!   through verbatim. No schema validation. No content transformation.
//! - **Unit accounting**: every attribute's write-capacity cost is
//!   computed HERE, at decode time, so the assembler downstream just
//!   adds integers. One unit ≈ 1 KiB of payload, rounded up.
//! - **Purity**: this module does no I/O. It is a transform. It has
//!   never seen a socket and it would like to keep it that way.
//!
//! 🦆 (the duck checked the base64 padding. it's fine. probably.)

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

/// 📏 One write capacity unit buys you this many bytes. The store's
/// pricing department was very clear about this.
pub const WRITE_UNIT_SIZE: usize = 1024;

/// 🎯 A tagged attribute value — the atomic unit of a record.
///
/// `S`, `N` and `B` get first-class variants because the loader has
/// opinions about them (well, mostly about `B`). Everything else —
/// maps, lists, sets, booleans, the store's entire extended family —
/// rides along untouched in `Other`. We don't validate it. We don't
/// transform it. We are a loader, not a therapist.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// 📜 A string. The most honest of the tagged values.
    S(String),
    /// 🔢 A number, stored as a string, because the wire format says so
    /// and arguing with the wire format is how restores die.
    N(String),
    /// 🔐 Raw bytes. Arrived as base64 (or an array of byte numbers),
    /// leaves as base64, but lives here in its natural state.
    B(Vec<u8>),
    /// 🎭 Anything else — nested maps, lists, sets. Passed through
    /// verbatim, tag and all. Not our circus, not our monkeys.
    Other(Value),
}

/// 📦 One decoded export line: attribute name → tagged value, plus the
/// unit accounting the assembler needs to make quota decisions.
///
/// Lifecycle: born from one input line, handed to the portion builder,
/// shipped by the executor, dropped. A mayfly with a payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    /// The attributes themselves. BTreeMap so the wire body is stable
    /// and test assertions don't play roulette with key order.
    pub attrs: BTreeMap<String, AttrValue>,
    /// 📊 Total write units this record will cost the quota.
    pub units: usize,
    /// ⚠️ The single most expensive attribute, in units. Batch mode
    /// uses this for the per-item size ceiling check. One chonky
    /// attribute can sink a whole batch. It knows what it did.
    pub largest_attr_units: usize,
}

impl Record {
    /// 📡 Re-encode this record as the wire-format item object.
    ///
    /// The inverse of decoding: `B` bytes go back into base64, `S`/`N`
    /// get their tags back, `Other` values were never untagged in the
    /// first place. Round-trips exactly (the tests hold us to this).
    pub fn to_wire(&self) -> Value {
        let mut item = Map::with_capacity(self.attrs.len());
        for (name, value) in &self.attrs {
            let tagged = match value {
                AttrValue::S(s) => serde_json::json!({ "S": s }),
                AttrValue::N(n) => serde_json::json!({ "N": n }),
                AttrValue::B(bytes) => serde_json::json!({ "B": BASE64.encode(bytes) }),
                AttrValue::Other(v) => v.clone(),
            };
            item.insert(name.clone(), tagged);
        }
        Value::Object(item)
    }

    /// 🔄 Rebuild a Record from a wire-format item object.
    ///
    /// Used when the store hands items BACK to us (unprocessed items in
    /// a partial batch failure) and we need to resubmit them. Same
    /// tagging rules as [`decode_line`], same unit accounting.
    pub fn from_wire(item: &Map<String, Value>) -> Result<Record> {
        let mut attrs = BTreeMap::new();
        let mut units = 0usize;
        let mut largest_attr_units = 0usize;

        for (name, tagged) in item {
            let (attr, attr_units) = decode_attr(name, tagged)
                .with_context(|| format!("💀 Attribute '{}' refused to decode", name))?;
            units += attr_units;
            largest_attr_units = largest_attr_units.max(attr_units);
            attrs.insert(name.clone(), attr);
        }

        Ok(Record { attrs, units, largest_attr_units })
    }
}

/// 🔍 Decode one tagged attribute value and price it in write units.
///
/// The rules, in full:
/// - `{"B": <base64 string>}` → raw bytes, priced by decoded length
/// - `{"B": [bytes...]}` → raw bytes, priced by array length
/// - `{"S": ...}` / `{"N": ...}` → their variants, priced by the
///   serialized length of the original tagged value
/// - anything else → `Other`, priced the same way
///
/// Unit cost always rounds UP. The store rounds up. We round up.
/// Nobody rounds down in this economy.
fn decode_attr(name: &str, tagged: &Value) -> Result<(AttrValue, usize)> {
    if let Some(binary) = tagged.get("B") {
        // 🔐 The binary tag. The one field we actually rewrite.
        let bytes = decode_binary(binary).with_context(|| {
            format!(
                "💀 The 'B' attribute '{}' claimed to be binary but would not \
                 decode. We expected base64 or an array of bytes. We received \
                 modern art.",
                name
            )
        })?;
        let units = unit_cost(bytes.len());
        return Ok((AttrValue::B(bytes), units));
    }

    // 📏 Non-binary attributes are priced by their serialized UTF-8
    // length, tag included — the same bytes the store will be charged
    // for, give or take its own bookkeeping.
    let units = unit_cost(tagged.to_string().len());

    let attr = match tagged {
        Value::Object(map) if map.len() == 1 => match (map.keys().next().map(String::as_str), map.values().next()) {
            (Some("S"), Some(Value::String(s))) => AttrValue::S(s.clone()),
            (Some("N"), Some(Value::String(n))) => AttrValue::N(n.clone()),
            // 🎭 A single-key object that isn't S or N — a set, a list,
            // a map, a bool. Pass it through. Ask no questions.
            _ => AttrValue::Other(tagged.clone()),
        },
        _ => AttrValue::Other(tagged.clone()),
    };

    Ok((attr, units))
}

/// 🔐 Decode the stored binary representation into raw bytes.
///
/// Two representations exist in the wild: base64 text (the official
/// one) and a bare JSON array of byte values (the "someone serialized
/// a Buffer" one). We accept both, because the dump you have is always
/// more real than the dump the docs describe.
fn decode_binary(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(encoded) => BASE64
            .decode(encoded)
            .context("not valid base64 — the padding gods were not appeased"),
        Value::Array(numbers) => numbers
            .iter()
            .map(|n| {
                n.as_u64()
                    .filter(|b| *b <= u8::MAX as u64)
                    .map(|b| b as u8)
                    .with_context(|| format!("'{}' is not a byte. Bytes go 0..=255. This is the law.", n))
            })
            .collect(),
        other => bail!(
            "binary attribute is neither a base64 string nor a byte array (found {})",
            json_kind(other)
        ),
    }
}

/// 📊 ceil(size / WRITE_UNIT_SIZE), floor one unit — even an empty
/// attribute costs something. The store is not a charity.
fn unit_cost(size_bytes: usize) -> usize {
    size_bytes.div_ceil(WRITE_UNIT_SIZE).max(1)
}

/// 🏷️ Human name for a JSON value's kind, for error messages that a
/// person can read at 3am without crying. (More crying, anyway.)
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// 📖 Decode one line of the export into a [`Record`].
///
/// The contract: the line is one UTF-8 JSON object, attribute name →
/// tagged value. Anything else is a decode error, and decode errors
/// are fatal to the run — a malformed line means the export is not
/// what the operator thinks it is, and silently skipping it would be
/// how you discover missing rows three weeks later. We decline.
pub fn decode_line(line: &str) -> Result<Record> {
    let parsed: Value = serde_json::from_str(line)
        .context("💀 This line of the export is not valid JSON. The dump may be truncated, corrupted, or not actually a dump. We stopped before writing anything weird.")?;

    let Value::Object(item) = parsed else {
        bail!(
            "💀 Expected a JSON object on this line, found {}. Every export line \
             must be one item. This one is... not.",
            json_kind(&parsed)
        );
    };

    Record::from_wire(&item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_base64_binary_comes_home_as_raw_bytes() -> Result<()> {
        // 🧪 "aGVsbG8=" is "hello" in base64 formalwear. Undress it.
        let record = decode_line(r#"{"payload":{"B":"aGVsbG8="},"id":{"S":"item-1"}}"#)?;

        assert_eq!(
            record.attrs.get("payload"),
            Some(&AttrValue::B(b"hello".to_vec())),
            "Binary must be restored to raw bytes before transmission"
        );
        assert_eq!(record.attrs.get("id"), Some(&AttrValue::S("item-1".into())));
        Ok(())
    }

    #[test]
    fn the_one_where_the_byte_array_representation_also_counts() -> Result<()> {
        // 🧪 Someone exported a Buffer as [104, 105]. We forgive them.
        let record = decode_line(r#"{"blob":{"B":[104,105]}}"#)?;
        assert_eq!(record.attrs.get("blob"), Some(&AttrValue::B(b"hi".to_vec())));
        Ok(())
    }

    #[test]
    fn the_one_where_binary_round_trips_through_the_wire() -> Result<()> {
        // 🧪 decode → to_wire → decode must reproduce the exact bytes.
        // If this fails, every restored blob in production is garbage.
        // No pressure.
        let original: Vec<u8> = (0u8..=255).collect();
        let line = format!(r#"{{"blob":{{"B":"{}"}}}}"#, BASE64.encode(&original));

        let record = decode_line(&line)?;
        let wire = record.to_wire();
        let reborn = Record::from_wire(wire.as_object().expect("wire item is an object"))?;

        assert_eq!(
            reborn.attrs.get("blob"),
            Some(&AttrValue::B(original)),
            "Round trip through the binary tag must be lossless"
        );
        Ok(())
    }

    #[test]
    fn the_one_where_nested_values_pass_through_untouched() -> Result<()> {
        // 🧪 A list and a map walk into a loader. The loader waves them through.
        let line = r#"{"tags":{"SS":["a","b"]},"meta":{"M":{"k":{"N":"7"}}}}"#;
        let record = decode_line(line)?;

        let tags: Value = serde_json::from_str(r#"{"SS":["a","b"]}"#)?;
        assert_eq!(record.attrs.get("tags"), Some(&AttrValue::Other(tags)));
        let meta: Value = serde_json::from_str(r#"{"M":{"k":{"N":"7"}}}"#)?;
        assert_eq!(record.attrs.get("meta"), Some(&AttrValue::Other(meta)));
        Ok(())
    }

    #[test]
    fn the_one_where_unit_cost_rounds_up_like_the_store_does() -> Result<()> {
        // 🧪 1500 bytes of binary = 2 units. The store would charge 2. So do we.
        let payload = vec![0x42u8; 1500];
        let line = format!(r#"{{"blob":{{"B":"{}"}}}}"#, BASE64.encode(&payload));
        let record = decode_line(&line)?;

        assert_eq!(record.units, 2, "1500 bytes is two 1 KiB units, not one");
        assert_eq!(record.largest_attr_units, 2);
        Ok(())
    }

    #[test]
    fn the_one_where_tiny_attributes_still_cost_one_unit() -> Result<()> {
        // 🧪 Even {"S":"x"} costs a unit. Minimum spend. Like a bar tab.
        let record = decode_line(r#"{"a":{"S":"x"},"b":{"N":"1"}}"#)?;
        assert_eq!(record.units, 2, "Two attributes, one unit each, no freebies");
        Ok(())
    }

    #[test]
    fn the_one_where_garbage_lines_are_fatal_not_skipped() {
        // 🧪 Malformed input aborts. Silently dropping rows is how
        // restores become archaeology projects.
        assert!(decode_line("{not json").is_err(), "Invalid JSON must fail");
        assert!(decode_line(r#""just a string""#).is_err(), "Non-object must fail");
        assert!(decode_line(r#"[1,2,3]"#).is_err(), "Array must fail");
    }

    #[test]
    fn the_one_where_fake_base64_is_called_out_by_name() {
        // 🧪 The error should mention which attribute lied to us.
        let err = decode_line(r#"{"cursed":{"B":"!!not-base64!!"}}"#).unwrap_err();
        assert!(
            format!("{:#}", err).contains("cursed"),
            "Error chain should name the offending attribute"
        );
    }
}
