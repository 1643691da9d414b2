use ratatui::prelude::{Color, Style};
use ratatui::text::{Line, Span};

pub const MARKERS: [char; 4] = ['*', 'x', 'v', 'o'];
pub const COLORS: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Red,
    Color::Blue,
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeriesStyle {
    pub marker: char,
    pub color: Color,
}

pub struct PlotSeries<'a> {
    pub name: &'a str,
    pub values: &'a [f64],
    pub style: SeriesStyle,
}

pub struct PlotRequest<'a> {
    pub x: &'a [f64],
    pub series: &'a [PlotSeries<'a>],
    /// Signed visible-window policy: n > 0 keeps the last n points, n < 0
    /// skips the first |n|-1 points, 0 shows everything.
    pub window: i64,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub log_scale: bool,
    pub width: u16,
    pub height: u16,
}

#[derive(Default)]
pub struct RenderedPlot {
    pub rows: Vec<Line<'static>>,
    pub warning: Option<String>,
}

pub fn window_start(len: usize, window: i64) -> usize {
    if window > 0 {
        len - len.min(window as usize)
    } else if window < 0 {
        let skip = window.unsigned_abs() as usize - 1;
        skip.min(len.saturating_sub(2))
    } else {
        0
    }
}

/// Render the visible window of the selected series onto a character grid.
/// The grid is built with row 0 at the bottom and emitted in reverse, so row
/// 0 of the output is the visual top. A fresh grid is constructed on every
/// call; nothing is shared between invocations.
pub fn render(req: &PlotRequest<'_>) -> RenderedPlot {
    let mut out = RenderedPlot::default();

    let len = req.x.len();
    if len < 2 || req.series.is_empty() {
        return out;
    }
    let start = window_start(len, req.window);
    if len - start < 2 {
        return out;
    }

    let mut windows: Vec<(usize, Vec<f64>)> = Vec::new();
    for (index, series) in req.series.iter().enumerate() {
        let Some(slice) = series.values.get(start..len) else {
            continue;
        };
        let values = if req.log_scale {
            slice
                .iter()
                .map(|v| {
                    let log = v.log10();
                    if log.is_finite() {
                        log
                    } else {
                        0.0
                    }
                })
                .collect()
        } else {
            slice.to_vec()
        };
        windows.push((index, values));
    }
    if windows.is_empty() {
        return out;
    }

    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for (_, values) in &windows {
        for &v in values {
            if !v.is_finite() {
                continue;
            }
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if !lo.is_finite() || !hi.is_finite() {
        return out;
    }
    if let Some(v) = req.y_min {
        lo = v;
    }
    if let Some(v) = req.y_max {
        hi = v;
    }
    if lo >= hi {
        let center = (lo + hi) / 2.0;
        lo = center - 1.0;
        hi = center + 1.0;
        out.warning = Some(format!(
            "Axis range is degenerate, widening to [{}, {}].",
            fmt_tick(lo),
            fmt_tick(hi)
        ));
    }

    let visible_x = &req.x[start..len];
    let mut xlo = f64::INFINITY;
    let mut xhi = f64::NEG_INFINITY;
    for &v in visible_x {
        if !v.is_finite() {
            continue;
        }
        xlo = xlo.min(v);
        xhi = xhi.max(v);
    }
    if !xlo.is_finite() || !xhi.is_finite() {
        return out;
    }
    let xspan = if xhi > xlo { xhi - xlo } else { 1.0 };

    let grid_h = usize::from(req.height).saturating_sub(3);
    if grid_h < 2 {
        return out;
    }
    let ticks: Vec<String> = (0..grid_h)
        .map(|r| fmt_tick(lo + (hi - lo) * r as f64 / (grid_h - 1) as f64))
        .collect();
    let label_w = ticks.iter().map(String::len).max().unwrap_or(0);
    let grid_w = usize::from(req.width).saturating_sub(label_w + 1);
    if grid_w < 2 {
        return out;
    }

    let mut grid: Vec<Vec<Option<(char, Color)>>> = vec![vec![None; grid_w]; grid_h];
    for (index, values) in &windows {
        let style = req.series[*index].style;
        for (offset, &v) in values.iter().enumerate() {
            if !v.is_finite() || v < lo || v > hi {
                continue;
            }
            let xv = visible_x[offset];
            if !xv.is_finite() {
                continue;
            }
            let col = (((xv - xlo) / xspan) * (grid_w - 1) as f64).round() as usize;
            let row = (((v - lo) / (hi - lo)) * (grid_h - 1) as f64).round() as usize;
            grid[row.min(grid_h - 1)][col.min(grid_w - 1)] = Some((style.marker, style.color));
        }
    }

    let axis_style = Style::default().fg(Color::DarkGray);

    let mut legend = Vec::new();
    for series in req.series {
        if !legend.is_empty() {
            legend.push(Span::raw("  "));
        }
        legend.push(Span::styled(
            format!("{} {}", series.style.marker, series.name),
            Style::default().fg(series.style.color),
        ));
    }
    out.rows.push(Line::from(legend));

    for r in (0..grid_h).rev() {
        let mut spans = vec![Span::styled(
            format!("{:>label_w$}|", ticks[r]),
            axis_style,
        )];
        let mut col = 0;
        while col < grid_w {
            match grid[r][col] {
                None => {
                    let run = grid[r][col..].iter().take_while(|c| c.is_none()).count();
                    spans.push(Span::raw(" ".repeat(run)));
                    col += run;
                }
                Some((_, color)) => {
                    let mut text = String::new();
                    while col < grid_w {
                        match grid[r][col] {
                            Some((marker, c)) if c == color => {
                                text.push(marker);
                                col += 1;
                            }
                            _ => break,
                        }
                    }
                    spans.push(Span::styled(text, Style::default().fg(color)));
                }
            }
        }
        out.rows.push(Line::from(spans));
    }

    out.rows.push(Line::from(Span::styled(
        format!("{:>label_w$}+{}", "", "-".repeat(grid_w)),
        axis_style,
    )));

    let left = fmt_tick(xlo);
    let right = fmt_tick(xhi);
    let label_row = if left.len() + right.len() < grid_w {
        format!(
            "{:>label_w$} {}{}{}",
            "",
            left,
            " ".repeat(grid_w - left.len() - right.len()),
            right
        )
    } else {
        format!("{:>label_w$} {}", "", left)
    };
    out.rows.push(Line::from(Span::styled(label_row, axis_style)));

    out
}

fn fmt_tick(v: f64) -> String {
    if v == 0.0 {
        "0".to_string()
    } else if v.abs() >= 10_000.0 || v.abs() < 0.001 {
        format!("{v:.2e}")
    } else if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.4}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    fn style(marker: char) -> SeriesStyle {
        SeriesStyle {
            marker,
            color: Color::Cyan,
        }
    }

    fn request<'a>(x: &'a [f64], series: &'a [PlotSeries<'a>]) -> PlotRequest<'a> {
        PlotRequest {
            x,
            series,
            window: 0,
            y_min: None,
            y_max: None,
            log_scale: false,
            width: 40,
            height: 12,
        }
    }

    #[test]
    fn window_start_boundaries() {
        assert_eq!(window_start(10, 3), 7);
        assert_eq!(window_start(10, 20), 0);
        assert_eq!(window_start(10, 0), 0);
        assert_eq!(window_start(10, -1), 0);
        assert_eq!(window_start(10, -5), 4);
        assert_eq!(window_start(3, -10), 1);
    }

    #[test]
    fn too_few_points_is_a_no_op() {
        let x = [1.0];
        let values = [0.5];
        let series = [PlotSeries {
            name: "C_lift",
            values: &values,
            style: style('*'),
        }];
        let rendered = render(&request(&x, &series));
        assert!(rendered.rows.is_empty());
        assert!(rendered.warning.is_none());
    }

    #[test]
    fn window_of_one_is_a_no_op() {
        let x = [0.0, 1.0, 2.0];
        let values = [0.1, 0.2, 0.3];
        let series = [PlotSeries {
            name: "C_lift",
            values: &values,
            style: style('*'),
        }];
        let mut req = request(&x, &series);
        req.window = 1;
        assert!(render(&req).rows.is_empty());
    }

    #[test]
    fn top_output_row_holds_the_maximum() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let values = [0.0, 1.0, 2.0, 3.0];
        let series = [PlotSeries {
            name: "C_lift",
            values: &values,
            style: style('*'),
        }];
        let rendered = render(&request(&x, &series));
        assert_eq!(rendered.rows.len(), 12);

        // Row 0 is the legend, row 1 the visual top of the grid.
        assert!(line_text(&rendered.rows[0]).contains("* C_lift"));
        let top = line_text(&rendered.rows[1]);
        assert!(top.trim_end().ends_with('*'), "top row was {top:?}");
        assert!(top.contains('3'));
        let bottom = line_text(&rendered.rows[9]);
        let marker_at = bottom.find('*');
        let axis_at = bottom.find('|');
        assert!(marker_at > axis_at, "bottom row was {bottom:?}");
    }

    #[test]
    fn degenerate_axis_is_widened() {
        let x = [0.0, 1.0, 2.0];
        let values = [5.0, 5.0, 5.0];
        let series = [PlotSeries {
            name: "C_drag",
            values: &values,
            style: style('x'),
        }];
        let rendered = render(&request(&x, &series));
        let warning = match rendered.warning {
            Some(warning) => warning,
            None => panic!("expected a warning"),
        };
        assert!(warning.contains('4') && warning.contains('6'), "{warning}");
        assert!(!rendered.rows.is_empty());
        assert!(line_text(&rendered.rows[1]).contains('6'));
    }

    #[test]
    fn log_scale_floors_invalid_results() {
        let x = [0.0, 1.0, 2.0];
        let values = [0.0, 10.0, 100.0];
        let series = [PlotSeries {
            name: "totalRes",
            values: &values,
            style: style('*'),
        }];
        let mut req = request(&x, &series);
        req.log_scale = true;
        let rendered = render(&req);
        // log10(0) floors to 0.0, so the axis spans [0, 2] and every row
        // keeps its point.
        assert!(rendered.warning.is_none());
        assert!(line_text(&rendered.rows[1]).contains('2'));
    }

    #[test]
    fn y_bound_overrides_clip_points() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let values = [0.0, 1.0, 2.0, 10.0];
        let series = [PlotSeries {
            name: "C_lift",
            values: &values,
            style: style('*'),
        }];
        let mut req = request(&x, &series);
        req.y_max = Some(3.0);
        let rendered = render(&req);
        let all: String = rendered.rows.iter().map(line_text).collect();
        assert_eq!(all.matches('*').count(), 4, "3 points plus legend marker");
    }

    #[test]
    fn palette_wraps_around() {
        assert_eq!(MARKERS[4 % MARKERS.len()], MARKERS[0]);
        assert_eq!(COLORS[6 % COLORS.len()], COLORS[0]);
    }
}
