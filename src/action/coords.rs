use crate::action::{FieldError, FieldValue};

/// Converts a model-space point into device pixels.
///
/// The first matching regime wins:
/// - both components in `[0, 1]`: fractions of the screen,
/// - both in `[0, 1000]`: the relative 0–1000 grid the prompts ask for,
/// - otherwise: absolute pixels.
///
/// Values are truncated toward zero and clamped to `[0, dim - 1]`.
pub fn normalize_point(
    values: &[FieldValue],
    width: u32,
    height: u32,
) -> Result<(i32, i32), FieldError> {
    let invalid = || FieldError::InvalidCoordinates(render(values));
    if values.len() < 2 {
        return Err(invalid());
    }
    let x = values[0].as_f64().filter(|v| v.is_finite()).ok_or_else(invalid)?;
    let y = values[1].as_f64().filter(|v| v.is_finite()).ok_or_else(invalid)?;

    let (w, h) = (width as f64, height as f64);
    let (px, py) = if (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y) {
        (x * w, y * h)
    } else if (0.0..=1000.0).contains(&x) && (0.0..=1000.0).contains(&y) {
        (x / 1000.0 * w, y / 1000.0 * h)
    } else {
        (x, y)
    };

    let max_x = width.saturating_sub(1) as i64;
    let max_y = height.saturating_sub(1) as i64;
    let px = (px.trunc() as i64).clamp(0, max_x) as i32;
    let py = (py.trunc() as i64).clamp(0, max_y) as i32;
    Ok((px, py))
}

/// Reads a point-valued field (e.g. `element=[500, 500]`) and normalizes it.
pub fn point_field(
    value: Option<&FieldValue>,
    field: &'static str,
    width: u32,
    height: u32,
) -> Result<(i32, i32), FieldError> {
    let value = value.ok_or(FieldError::Missing(field))?;
    let items = value
        .as_list()
        .ok_or_else(|| FieldError::InvalidCoordinates(value.to_string()))?;
    if items.is_empty() {
        return Err(FieldError::Missing(field));
    }
    normalize_point(items, width, height)
}

fn render(values: &[FieldValue]) -> String {
    FieldValue::List(values.to_vec()).to_string()
}
