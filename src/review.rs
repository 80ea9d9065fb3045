//! Post-run review of I(t) break-junction traces.
//!
//! A trace table holds one trace per column pair; the current of the trace
//! with (even) index `i` lives in column `i + 1`. Each trace is shown offset by
//! the current setpoint, smoothed, and histogrammed both as current and as
//! conductance in units of the conductance quantum.

use std::path::Path;

use log::info;
use ndarray::Array2;

use crate::error::AcqError;

/// Elementary charge in C.
pub const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;
/// Planck constant in J s.
pub const PLANCK: f64 = 6.626_070_15e-34;
/// Conductance quantum 2e²/h in S.
pub const G0: f64 = 2.0 * ELEMENTARY_CHARGE * ELEMENTARY_CHARGE / PLANCK;

/// Read a whitespace (or comma) separated numeric table.
pub fn load_table(path: impl AsRef<Path>) -> Result<Array2<f64>, AcqError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| AcqError::io(e, format!("Could not read {}", path.display())))?;
    let table = parse_table(&text)?;
    info!(
        "Loaded {} rows x {} columns from {}",
        table.nrows(),
        table.ncols(),
        path.display()
    );
    Ok(table)
}

pub fn parse_table(text: &str) -> Result<Array2<f64>, AcqError> {
    let mut values = Vec::new();
    let mut columns = None;
    let mut rows = 0;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|cell| !cell.is_empty())
            .map(|cell| {
                cell.parse::<f64>().map_err(|_| {
                    AcqError::Data(format!("line {}: not a number: {cell:?}", line_no + 1))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        match columns {
            None => columns = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(AcqError::Data(format!(
                    "line {}: expected {n} columns, found {}",
                    line_no + 1,
                    row.len()
                )));
            }
            Some(_) => {}
        }
        values.extend(row);
        rows += 1;
    }

    let columns = columns.unwrap_or(0);
    Array2::from_shape_vec((rows, columns), values)
        .map_err(|e| AcqError::Data(format!("bad table shape: {e}")))
}

/// Order-1 Savitzky-Golay filter with polynomial-fit edges.
///
/// Interior points are the mean over the window; the first and last
/// `window / 2` points come from a least-squares line through the first and
/// last full window.
pub fn smooth_linear(data: &[f64], window: usize) -> Result<Vec<f64>, AcqError> {
    if window < 2 {
        return Err(AcqError::Data(format!(
            "smoothing window must be at least 2, got {window}"
        )));
    }
    let n = data.len();
    if n < window {
        return Err(AcqError::Data(format!(
            "trace has {n} points, shorter than the smoothing window {window}"
        )));
    }

    let half = window / 2;
    // Even windows lean one sample to the right
    let behind = (window - 1) / 2;
    let mut out = vec![0.0; n];

    for i in half..n - half {
        let start = i - behind;
        out[i] = data[start..start + window].iter().sum::<f64>() / window as f64;
    }

    let head = line_fit(&data[..window]);
    for (i, slot) in out.iter_mut().enumerate().take(half) {
        *slot = head.at(i as f64);
    }
    let tail = line_fit(&data[n - window..]);
    for k in 0..half {
        out[n - half + k] = tail.at((window - half + k) as f64);
    }

    Ok(out)
}

struct Line {
    mean_x: f64,
    mean_y: f64,
    slope: f64,
}

impl Line {
    fn at(&self, x: f64) -> f64 {
        self.mean_y + self.slope * (x - self.mean_x)
    }
}

fn line_fit(ys: &[f64]) -> Line {
    let n = ys.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (num, den) = ys.iter().enumerate().fold((0.0, 0.0), |(num, den), (k, y)| {
        let dx = k as f64 - mean_x;
        (num + dx * (y - mean_y), den + dx * dx)
    });
    Line {
        mean_x,
        mean_y,
        slope: if den > 0.0 { num / den } else { 0.0 },
    }
}

/// Equal-width histogram over the data range, as `(bin center, count)` for
/// non-empty bins only. Non-finite values are ignored.
pub fn histogram(values: &[f64], bins: usize) -> Vec<(f64, usize)> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }

    let mut lo = finite.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let mut hi = finite.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;

    let mut counts = vec![0usize; bins];
    for v in finite {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .filter(|(_, c)| *c > 0)
        .map(|(i, c)| (lo + (i as f64 + 0.5) * width, c))
        .collect()
}

/// Display parameters for a trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewParams {
    pub sample_spacing_s: f64,
    /// Current setpoint in A, subtracted from every sample.
    pub setpoint_a: f64,
    pub bias_v: f64,
    pub smoothing_window: usize,
    pub histogram_bins: usize,
}

impl Default for ReviewParams {
    fn default() -> Self {
        Self {
            sample_spacing_s: 2160e-6,
            setpoint_a: 0.35e-9,
            bias_v: 0.6,
            smoothing_window: 8,
            histogram_bins: 250,
        }
    }
}

/// Everything shown for one trace.
#[derive(Debug, Clone)]
pub struct TraceView {
    pub index: usize,
    pub times: Vec<f64>,
    pub currents: Vec<f64>,
    pub smoothed: Vec<f64>,
    pub current_histogram: Vec<(f64, usize)>,
    /// Bin centers in multiples of G0.
    pub conductance_histogram: Vec<(f64, usize)>,
}

impl TraceView {
    pub fn compute(
        table: &Array2<f64>,
        index: usize,
        params: &ReviewParams,
    ) -> Result<Self, AcqError> {
        let column = index + 1;
        if column >= table.ncols() {
            return Err(AcqError::Data(format!(
                "trace {index} needs column {column}, table has {}",
                table.ncols()
            )));
        }
        if params.bias_v == 0.0 {
            return Err(AcqError::Data("bias voltage must be non-zero".to_string()));
        }

        let currents: Vec<f64> = table
            .column(column)
            .iter()
            .map(|i| i - params.setpoint_a)
            .collect();
        let times = (0..currents.len())
            .map(|k| k as f64 * params.sample_spacing_s)
            .collect();
        let smoothed = smooth_linear(&currents, params.smoothing_window)?;
        let conductance: Vec<f64> = currents
            .iter()
            .map(|i| i / (params.bias_v * G0))
            .collect();

        Ok(Self {
            index,
            times,
            current_histogram: histogram(&currents, params.histogram_bins),
            conductance_histogram: histogram(&conductance, params.histogram_bins),
            smoothed,
            currents,
        })
    }
}

/// Navigation over the trace indices of a table.
#[derive(Debug, Clone)]
pub struct TracePager {
    index: usize,
    step: usize,
    last: usize,
    saved: Vec<usize>,
}

impl TracePager {
    pub fn new(columns: usize, step: usize) -> Result<Self, AcqError> {
        if step == 0 {
            return Err(AcqError::Config("trace step must be positive".to_string()));
        }
        if columns < 2 {
            return Err(AcqError::Data(format!(
                "table with {columns} columns holds no traces"
            )));
        }
        Ok(Self {
            index: 0,
            step,
            last: ((columns - 2) / step) * step,
            saved: Vec::new(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn last_index(&self) -> usize {
        self.last
    }

    pub fn next(&mut self) -> usize {
        self.index += self.step;
        if self.index > self.last {
            self.index = 0;
        }
        self.index
    }

    pub fn previous(&mut self) -> usize {
        self.index = if self.index < self.step {
            self.last
        } else {
            self.index - self.step
        };
        self.index
    }

    pub fn goto(&mut self, index: usize) -> Result<usize, AcqError> {
        if index % self.step != 0 {
            return Err(AcqError::Data(format!(
                "trace index must be a multiple of {}, got {index}",
                self.step
            )));
        }
        if index > self.last {
            return Err(AcqError::Data(format!(
                "trace index {index} is past the last trace {}",
                self.last
            )));
        }
        self.index = index;
        Ok(index)
    }

    pub fn save(&mut self) -> usize {
        self.saved.push(self.index);
        self.index
    }

    pub fn saved(&self) -> &[usize] {
        &self.saved
    }
}

/// One line of interactive input while paging through traces.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewCommand {
    Next,
    Previous,
    Goto(usize),
    Save,
    /// New setpoint current in nA.
    Setpoint(f64),
    /// New bias voltage in V.
    Bias(f64),
    Help,
    Quit,
}

impl std::str::FromStr for ReviewCommand {
    type Err = AcqError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or("n");
        let arg = parts.next();
        let number = |what: &str| -> Result<f64, AcqError> {
            arg.ok_or_else(|| AcqError::Data(format!("{verb} needs {what}")))?
                .parse::<f64>()
                .map_err(|_| AcqError::Data(format!("{verb}: not a number: {arg:?}")))
        };

        Ok(match verb {
            "n" | "next" => Self::Next,
            "p" | "prev" | "previous" => Self::Previous,
            "g" | "goto" => {
                let index = arg
                    .ok_or_else(|| AcqError::Data("goto needs a trace index".to_string()))?
                    .parse::<usize>()
                    .map_err(|_| AcqError::Data(format!("goto: not an index: {arg:?}")))?;
                Self::Goto(index)
            }
            "s" | "save" => Self::Save,
            "i" | "setpoint" => Self::Setpoint(number("a current in nA")?),
            "b" | "bias" => {
                let bias = number("a voltage")?;
                if bias == 0.0 {
                    return Err(AcqError::Data("bias voltage must be non-zero".to_string()));
                }
                Self::Bias(bias)
            }
            "h" | "help" | "?" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            other => return Err(AcqError::Data(format!("unknown command {other:?}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn g0_matches_reference_value() {
        assert!((G0 - 7.748_091_729e-5).abs() < 1e-13);
    }

    #[test]
    fn parses_tables_and_skips_comments() {
        let table = parse_table("# t I\n0 1e-9 0 2e-9\n\n1,3e-9,1,4e-9\n").unwrap();
        assert_eq!(table.dim(), (2, 4));
        assert_eq!(table[[1, 3]], 4e-9);
    }

    #[test]
    fn rejects_ragged_and_non_numeric_rows() {
        assert!(matches!(parse_table("1 2\n3\n"), Err(AcqError::Data(_))));
        assert!(matches!(parse_table("1 x\n"), Err(AcqError::Data(_))));
    }

    #[test]
    fn odd_windows_preserve_lines() {
        let data: Vec<f64> = (0..20).map(|k| 2.0 * k as f64 - 3.0).collect();
        for window in [3, 5, 9] {
            let smoothed = smooth_linear(&data, window).unwrap();
            assert!(data.iter().zip(&smoothed).all(|(a, b)| close(*a, *b)));
        }
    }

    #[test]
    fn edges_follow_the_fitted_line() {
        let data: Vec<f64> = (0..20).map(|k| 0.5 * k as f64).collect();
        let smoothed = smooth_linear(&data, 8).unwrap();
        for i in (0..4).chain(16..20) {
            assert!(close(smoothed[i], data[i]));
        }
    }

    #[test]
    fn even_window_averages_leaning_right() {
        let mut data = vec![0.0; 12];
        data[8] = 8.0;
        let smoothed = smooth_linear(&data, 8).unwrap();
        // Window for index 4 spans 1..=8
        assert!(close(smoothed[4], 1.0));
        // Window for index 5 spans 2..=9
        assert!(close(smoothed[5], 1.0));
    }

    #[test]
    fn smoothing_rejects_short_traces() {
        assert!(smooth_linear(&[1.0, 2.0], 8).is_err());
        assert!(smooth_linear(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn histogram_drops_empty_bins() {
        let bins = histogram(&[0.0, 0.0, 1.0, f64::NAN], 4);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0], (0.125, 2));
        assert_eq!(bins[1], (0.875, 1));
    }

    #[test]
    fn histogram_of_constant_data_uses_unit_range() {
        assert_eq!(histogram(&[2.0, 2.0], 2), vec![(2.25, 2)]);
    }

    #[test]
    fn pager_wraps_both_ways() {
        // columns: t0 I0 t1 I1 t2 I2 -> traces 0, 2, 4
        let mut pager = TracePager::new(6, 2).unwrap();
        assert_eq!(pager.last_index(), 4);
        assert_eq!(pager.next(), 2);
        assert_eq!(pager.next(), 4);
        assert_eq!(pager.next(), 0);
        assert_eq!(pager.previous(), 4);
        assert_eq!(pager.goto(2).unwrap(), 2);
        assert!(pager.goto(3).is_err());
        assert!(pager.goto(6).is_err());
        pager.save();
        pager.next();
        pager.save();
        assert_eq!(pager.saved(), &[2, 4]);
    }

    #[test]
    fn trace_view_offsets_and_converts() {
        let mut text = String::new();
        for k in 0..10 {
            text.push_str(&format!("{k} 1.35e-9\n"));
        }
        let table = parse_table(&text).unwrap();
        let params = ReviewParams {
            setpoint_a: 0.35e-9,
            bias_v: 1.0,
            ..Default::default()
        };
        let view = TraceView::compute(&table, 0, &params).unwrap();
        assert!(view.currents.iter().all(|i| close(*i, 1e-9)));
        assert!(close(view.times[2], 2.0 * 2160e-6));
        assert_eq!(view.current_histogram.len(), 1);
        let (g, count) = view.conductance_histogram[0];
        assert_eq!(count, 10);
        assert!((g - 1e-9 / G0).abs() < 0.5 + 1e-9);

        assert!(TraceView::compute(&table, 2, &params).is_err());
    }

    #[test]
    fn parses_review_commands() {
        assert_eq!("".parse::<ReviewCommand>().unwrap(), ReviewCommand::Next);
        assert_eq!("p".parse::<ReviewCommand>().unwrap(), ReviewCommand::Previous);
        assert_eq!("g 12".parse::<ReviewCommand>().unwrap(), ReviewCommand::Goto(12));
        assert_eq!("i 0.5".parse::<ReviewCommand>().unwrap(), ReviewCommand::Setpoint(0.5));
        assert_eq!("b -0.1".parse::<ReviewCommand>().unwrap(), ReviewCommand::Bias(-0.1));
        assert_eq!("quit".parse::<ReviewCommand>().unwrap(), ReviewCommand::Quit);
        assert!("g".parse::<ReviewCommand>().is_err());
        assert!("b 0".parse::<ReviewCommand>().is_err());
        assert!("x".parse::<ReviewCommand>().is_err());
    }
}
