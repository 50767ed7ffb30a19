//! InfluxDB line protocol
//!
//! `measurement,tag=value field=1i,other=2i <unix seconds>`

use super::Point;

/// Encode one point; tags with empty values are left out
pub fn encode_point(point: &Point) -> String {
    let mut line = escape(&point.measurement, &[',', ' ']);

    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape(key, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape(value, &[',', '=', ' ']));
    }

    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}i", escape(key, &[',', '=', ' ']), value))
        .collect();

    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&point.time.timestamp().to_string());
    line
}

/// Encode a batch, one point per line; points without fields are dropped
pub fn encode_batch(points: &[Point]) -> String {
    points
        .iter()
        .filter(|point| !point.fields.is_empty())
        .map(encode_point)
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape(s: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
