use textplots::{Chart, Plot, Shape};

use crate::error::AcqError;

/// Determine the best scale and SI prefix for a given maximum magnitude
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1e6 {
        (1e-6, "M")
    } else if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

/// Plot `y` over `x` in the terminal with automatic SI scaling of the y axis
///
/// # Examples
/// ```
/// use rusty_acq::plotting::plot_series;
///
/// let t = vec![0.0, 1.0, 2.0, 3.0];
/// let d = vec![0.0, 1e-9, 2.5e-9, 3e-9];
/// plot_series(&t, &d, "Thickness", "m").unwrap();
/// ```
pub fn plot_series(x: &[f64], y: &[f64], title: &str, unit: &str) -> Result<(), AcqError> {
    if y.is_empty() || x.len() != y.len() {
        return Err(AcqError::Data(format!(
            "cannot plot {} x values against {} y values",
            x.len(),
            y.len()
        )));
    }

    let min_value = y.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_value = y.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let (scale, prefix) = determine_scale(max_value.abs().max(min_value.abs()));

    let frame: Vec<(f32, f32)> = x
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| (xi as f32, (yi * scale) as f32))
        .collect();

    let x_min = x.iter().fold(f64::INFINITY, |a, &b| a.min(b)) as f32;
    let mut x_max = x.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)) as f32;
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    println!("{title}");
    println!(
        "{} points | {:.3} to {:.3} {prefix}{unit}",
        y.len(),
        min_value * scale,
        max_value * scale
    );
    Chart::new(140, 60, x_min, x_max)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    Ok(())
}

/// Plot a histogram given as `(bin center, count)` pairs, one step per bin
pub fn plot_histogram(bins: &[(f64, usize)], title: &str, unit: &str) -> Result<(), AcqError> {
    if bins.is_empty() {
        return Err(AcqError::Data("cannot plot an empty histogram".to_string()));
    }

    let max_abs = bins
        .iter()
        .fold(0.0_f64, |a, (center, _)| a.max(center.abs()));
    let (scale, prefix) = determine_scale(max_abs);

    let frame: Vec<(f32, f32)> = bins
        .iter()
        .map(|(center, count)| ((center * scale) as f32, *count as f32))
        .collect();
    let x_min = frame.first().map(|p| p.0).unwrap_or(0.0);
    let mut x_max = frame.last().map(|p| p.0).unwrap_or(1.0);
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    println!("{title} [{prefix}{unit}]");
    Chart::new(140, 40, x_min, x_max)
        .lineplot(&Shape::Steps(&frame))
        .nice();

    Ok(())
}
