//! Flat `<xml><key>value</key>...</xml>` documents used by the v2 API.

use pay_core::{PaymentError, PaymentResult};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;

/// Serialize a flat parameter map. Values are escaped as text.
pub fn to_xml(params: &BTreeMap<String, String>) -> PaymentResult<String> {
    let mut writer = Writer::new(Vec::new());

    write(&mut writer, Event::Start(BytesStart::new("xml")))?;
    for (key, value) in params {
        write(&mut writer, Event::Start(BytesStart::new(key.as_str())))?;
        write(&mut writer, Event::Text(BytesText::new(value)))?;
        write(&mut writer, Event::End(BytesEnd::new(key.as_str())))?;
    }
    write(&mut writer, Event::End(BytesEnd::new("xml")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| PaymentError::Internal(format!("xml write: {}", e)))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> PaymentResult<()> {
    writer
        .write_event(event)
        .map_err(|e| PaymentError::Internal(format!("xml write: {}", e)))
}

/// Parse a flat document into its child elements.
///
/// Text and CDATA are both accepted. Nested elements below the first level
/// are not part of the v2 protocol and are rejected. Entity declarations are
/// never expanded.
pub fn parse_xml(body: &str) -> PaymentResult<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut fields = BTreeMap::new();
    let mut depth = 0usize;
    let mut current: Option<String> = None;

    let parse_error = |msg: String| PaymentError::WebhookParseError(format!("invalid XML: {}", msg));

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                match depth {
                    1 => {}
                    2 => {
                        current = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    }
                    _ => return Err(parse_error("nested element".to_string())),
                }
            }
            Ok(Event::Empty(e)) if depth == 1 => {
                fields.insert(
                    String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    String::new(),
                );
            }
            Ok(Event::Text(t)) => {
                if let Some(name) = &current {
                    let text = t.unescape().map_err(|e| parse_error(e.to_string()))?;
                    fields
                        .entry(name.clone())
                        .or_insert_with(String::new)
                        .push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(name) = &current {
                    let inner = c.into_inner();
                    fields
                        .entry(name.clone())
                        .or_insert_with(String::new)
                        .push_str(&String::from_utf8_lossy(&inner));
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    if let Some(name) = current.take() {
                        fields.entry(name).or_insert_with(String::new);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::DocType(_)) => return Err(parse_error("DOCTYPE not allowed".to_string())),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(parse_error(format!(
                    "{} at position {}",
                    e,
                    reader.buffer_position()
                )))
            }
        }
    }

    if depth != 0 {
        return Err(parse_error("unterminated document".to_string()));
    }
    if fields.is_empty() {
        return Err(parse_error("no fields".to_string()));
    }

    Ok(fields)
}
