//! Reference chart rendering with Plotters
//!
//! A stand-in for the dashboard: it consumes only the fitted model and the
//! taxonomy, never the pipeline internals. Any other renderer can do the
//! same from the JSON report.

use std::path::Path;

use plotters::prelude::*;
use plotters::style::full_palette::ORANGE;

use crate::error::{Result, SegmentError};
use crate::model::SegmentModel;
use crate::taxonomy;

type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Map a taxonomy color name to a drawable color
fn segment_color(name: &str) -> RGBColor {
    match name {
        "red" => RED,
        "orange" => ORANGE,
        "green" => GREEN,
        "blue" => BLUE,
        _ => BLACK,
    }
}

fn profile_for(segment: usize) -> &'static taxonomy::SegmentProfile {
    taxonomy::profile(segment).unwrap_or(&taxonomy::GENERIC)
}

/// Scatter of Frequency vs Monetary (scaled space), colored by segment,
/// with centroid markers
pub fn render_segment_scatter(model: &SegmentModel, output_path: &Path) -> Result<()> {
    draw_scatter(model, output_path).map_err(|e| SegmentError::Render(e.to_string()))
}

fn draw_scatter(model: &SegmentModel, output_path: &Path) -> DrawResult {
    let frequency = model.scaled.column(1);
    let monetary = model.scaled.column(2);

    let freq_min = frequency.iter().fold(f64::INFINITY, |a, &b| a.min(b)) - 0.5;
    let freq_max = frequency.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)) + 0.5;
    let mon_min = monetary.iter().fold(f64::INFINITY, |a, &b| a.min(b)) - 0.5;
    let mon_max = monetary.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)) + 0.5;

    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Customer Segments: Frequency vs Monetary (scaled)",
            ("sans-serif", 30),
        )
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(freq_min..freq_max, mon_min..mon_max)?;

    chart
        .configure_mesh()
        .x_desc("Frequency (scaled)")
        .y_desc("Monetary (scaled)")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for segment in 0..model.k {
        let profile = profile_for(segment);
        let color = segment_color(profile.color);
        chart
            .draw_series(
                model
                    .scaled
                    .outer_iter()
                    .zip(&model.labels)
                    .filter(|(_, &label)| label == segment)
                    .map(|(row, _)| Circle::new((row[1], row[2]), 4, color.filled())),
            )?
            .label(profile.label)
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }

    // Centroids as squares on top of their segments.
    for (segment, centroid) in model.centroids.outer_iter().enumerate() {
        let color = segment_color(profile_for(segment).color);
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (centroid[1] - 0.1, centroid[2] - 0.1),
                (centroid[1] + 0.1, centroid[2] + 0.1),
            ],
            color.filled(),
        )))?;
    }

    chart.configure_series_labels().draw()?;
    root.present()?;
    Ok(())
}

/// Bar chart of customers per segment
pub fn render_segment_sizes(model: &SegmentModel, output_path: &Path) -> Result<()> {
    draw_sizes(model, output_path).map_err(|e| SegmentError::Render(e.to_string()))
}

fn draw_sizes(model: &SegmentModel, output_path: &Path) -> DrawResult {
    let sizes = model.segment_sizes();
    let max_size = *sizes.iter().max().unwrap_or(&1) as f64;

    let root = BitMapBackend::new(output_path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Segment Sizes", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..(model.k as f64), 0f64..(max_size * 1.1))?;

    chart
        .configure_mesh()
        .x_desc("Segment")
        .y_desc("Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for (segment, &size) in sizes.iter().enumerate() {
        let color = segment_color(profile_for(segment).color);
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (segment as f64 + 0.1, 0.0),
                (segment as f64 + 0.9, size as f64),
            ],
            color.filled(),
        )))?;
    }

    root.present()?;
    Ok(())
}

/// Render the scatter and the size chart next to each other
pub fn render_report_charts(model: &SegmentModel, base_output_path: &Path) -> Result<()> {
    render_segment_scatter(model, base_output_path)?;

    let sizes_path = match base_output_path.file_stem() {
        Some(stem) => {
            let mut name = stem.to_os_string();
            name.push("_sizes.png");
            base_output_path.with_file_name(name)
        }
        None => base_output_path.with_file_name("segment_sizes.png"),
    };
    render_segment_sizes(model, &sizes_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_colors_follow_taxonomy() {
        assert_eq!(segment_color("red"), RED);
        assert_eq!(segment_color("orange"), ORANGE);
        assert_eq!(segment_color("green"), GREEN);
        assert_eq!(segment_color("blue"), BLUE);
        assert_eq!(segment_color("chartreuse"), BLACK);
    }

    #[test]
    fn test_sizes_path_derivation() {
        let base = Path::new("/tmp/out/segments.png");
        let mut name = base.file_stem().unwrap().to_os_string();
        name.push("_sizes.png");
        let derived = base.with_file_name(name);
        assert_eq!(derived, Path::new("/tmp/out/segments_sizes.png"));
    }
}
