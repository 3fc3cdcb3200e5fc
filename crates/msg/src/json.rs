//! One-message-per-line JSON codec
//!
//! Two accepted forms, one per line:
//!
//! - `[dir, seq, "time", "TYPE", body, {tags}]` - any message; `body` is a
//!   hex string for wire bodies and an object for UPDATEs
//! - `{...}` - shorthand for a single UPDATE
//!
//! Rendering is canonical: serializing a parsed message is a fixed point.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::{wire, Body, Dir, Msg, MsgError, MsgType, Result, UpdateBody};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

impl Msg {
    /// Render the canonical one-line JSON form (no trailing newline)
    pub fn to_json(&self) -> String {
        let dir = match self.dir() {
            Some(d) => d.as_str(),
            None => "",
        };

        let typ = match self.typ().name() {
            Some(name) => Value::from(name),
            None => Value::from(self.typ().code()),
        };

        let body = match self.body() {
            Body::None => Value::from(""),
            Body::Update(u) => update_to_value(u),
            Body::Raw(b) if self.typ() == MsgType::UPDATE => match wire::decode_update(b) {
                Ok(u) => update_to_value(&u),
                Err(_) => Value::from(hex::encode(b)),
            },
            Body::Raw(b) => Value::from(hex::encode(b)),
        };

        let tags: Map<String, Value> = self
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();

        json!([
            dir,
            self.seq(),
            self.time.format(TIME_FORMAT).to_string(),
            typ,
            body,
            tags
        ])
        .to_string()
    }
}

/// Parse the generic array form
pub fn msg_from_json(line: &[u8]) -> Result<Msg> {
    let val: Value = serde_json::from_slice(line)?;
    let arr = val.as_array().ok_or(MsgError::Format)?;
    if !(5..=6).contains(&arr.len()) {
        return Err(MsgError::Format);
    }

    let typ = parse_typ(&arr[3])?;
    let mut m = Msg::new(typ);

    match arr[0].as_str() {
        Some("") | None => {}
        Some(s) => m.set_dir(s.parse()?),
    }

    m.set_seq(arr[1].as_u64().ok_or(MsgError::Format)?);

    if let Some(t) = arr[2].as_str() {
        m.time = parse_time(t)?;
    }

    match &arr[4] {
        Value::String(s) if s.is_empty() => {}
        Value::String(s) => {
            let bytes = hex::decode(s).map_err(|_| MsgError::Format)?;
            m.set_body(Body::Raw(bytes.into()));
        }
        Value::Object(obj) if typ == MsgType::UPDATE => {
            m.set_body(Body::Update(update_from_value(obj)?));
        }
        _ => return Err(MsgError::Format),
    }

    if let Some(tags) = arr.get(5) {
        let obj = tags.as_object().ok_or(MsgError::Format)?;
        for (k, v) in obj {
            let v = v.as_str().ok_or(MsgError::Format)?;
            m.tags.insert(k.clone(), v.to_string());
        }
    }

    Ok(m)
}

/// Parse the `{...}` object form as an UPDATE
pub fn update_from_json(line: &[u8]) -> Result<Msg> {
    let val: Value = serde_json::from_slice(line)?;
    let obj = val.as_object().ok_or(MsgError::Format)?;
    Ok(Msg::update(update_from_value(obj)?))
}

fn parse_typ(v: &Value) -> Result<MsgType> {
    match v {
        Value::String(s) => s.parse(),
        Value::Number(n) => match n.as_u64() {
            Some(code) if code <= 0xff => Ok(MsgType(code as u8)),
            _ => Err(MsgError::Format),
        },
        _ => Err(MsgError::Format),
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| MsgError::Format)
}

fn update_to_value(u: &UpdateBody) -> Value {
    let mut obj = Map::new();
    obj.insert("type".into(), "UPDATE".into());
    if !u.reach.is_empty() {
        obj.insert("nlri".into(), str_array(&u.reach));
    }
    if !u.unreach.is_empty() {
        obj.insert("withdraw".into(), str_array(&u.unreach));
    }
    if !u.attrs.is_empty() {
        obj.insert("attrs".into(), Value::Object(u.attrs.clone()));
    }
    Value::Object(obj)
}

fn update_from_value(obj: &Map<String, Value>) -> Result<UpdateBody> {
    let mut u = UpdateBody::default();
    for (key, val) in obj {
        match key.as_str() {
            "type" => {
                if val.as_str() != Some("UPDATE") {
                    return Err(MsgError::Format);
                }
            }
            "nlri" => u.reach = str_vec(val)?,
            "withdraw" => u.unreach = str_vec(val)?,
            "attrs" => {
                u.attrs = val.as_object().ok_or(MsgError::Format)?.clone();
            }
            _ => return Err(MsgError::Format),
        }
    }
    Ok(u)
}

fn str_array(items: &[String]) -> Value {
    Value::Array(items.iter().map(|s| Value::from(s.as_str())).collect())
}

fn str_vec(v: &Value) -> Result<Vec<String>> {
    v.as_array()
        .ok_or(MsgError::Format)?
        .iter()
        .map(|p| {
            p.as_str()
                .map(str::to_string)
                .ok_or(MsgError::Format)
        })
        .collect()
}
