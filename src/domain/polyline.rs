// Encoded polyline codec used by routing providers
use super::coordinate::Coordinate;
use thiserror::Error;

/// Number of decimal places packed into each encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// 1e5, the classic encoding.
    Five,
    /// 1e6, used by OSRM's `polyline6` geometries.
    Six,
}

impl Precision {
    pub fn factor(self) -> f64 {
        match self {
            Precision::Five => 1e5,
            Precision::Six => 1e6,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolylineError {
    #[error("invalid polyline character {character:?} at byte {position}")]
    InvalidCharacter { character: char, position: usize },
    #[error("polyline ends in the middle of a value")]
    Truncated,
    #[error("polyline value at byte {position} does not fit in 64 bits")]
    Overflow { position: usize },
}

/// Decode an encoded polyline into coordinates.
pub fn decode(encoded: &str, precision: Precision) -> Result<Vec<Coordinate>, PolylineError> {
    let factor = precision.factor();
    let bytes = encoded.as_bytes();
    let mut coordinates = Vec::with_capacity(bytes.len() / 4);
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;

    while index < bytes.len() {
        lat += next_delta(bytes, &mut index)?;
        if index >= bytes.len() {
            return Err(PolylineError::Truncated);
        }
        lng += next_delta(bytes, &mut index)?;

        coordinates.push(Coordinate::new(lat as f64 / factor, lng as f64 / factor));
    }

    Ok(coordinates)
}

/// Encode coordinates as a polyline string.
pub fn encode(coordinates: &[Coordinate], precision: Precision) -> String {
    let factor = precision.factor();
    let mut out = String::with_capacity(coordinates.len() * 8);
    let mut prev_lat: i64 = 0;
    let mut prev_lng: i64 = 0;

    for c in coordinates {
        let lat = (c.latitude * factor).round() as i64;
        let lng = (c.longitude * factor).round() as i64;
        push_value(&mut out, lat - prev_lat);
        push_value(&mut out, lng - prev_lng);
        prev_lat = lat;
        prev_lng = lng;
    }

    out
}

fn next_delta(bytes: &[u8], index: &mut usize) -> Result<i64, PolylineError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;

    loop {
        let position = *index;
        let Some(&byte) = bytes.get(position) else {
            return Err(PolylineError::Truncated);
        };
        if !(63..=126).contains(&byte) {
            return Err(PolylineError::InvalidCharacter {
                character: byte as char,
                position,
            });
        }
        if shift > 60 {
            return Err(PolylineError::Overflow { position });
        }

        let chunk = u64::from(byte - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        *index += 1;

        if chunk < 0x20 {
            break;
        }
    }

    let value = (result >> 1) as i64;
    Ok(if result & 1 == 1 { !value } else { value })
}

fn push_value(out: &mut String, value: i64) {
    let mut v = (if value < 0 { !(value << 1) } else { value << 1 }) as u64;
    while v >= 0x20 {
        out.push(char::from((0x20 | (v & 0x1f)) as u8 + 63));
        v >>= 5;
    }
    out.push(char::from(v as u8 + 63));
}
