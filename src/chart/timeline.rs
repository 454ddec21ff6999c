use log::debug;

use crate::chart::buffer::AggregationBuffer;
use crate::config::types::ChartConfig;

/// One averaged window. `hour_offset` counts windows since the session started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartPoint {
    pub hour_offset: f64,
    pub value: f64,
}

/// Everything the chart renderer needs to redraw. The line and bar series carry the same points.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartFeed {
    /// (x, value) with x = session start hour + hour offset
    pub line: Vec<(f64, f64)>,
    pub bar: Vec<(f64, f64)>,
    pub visible_hours: f64,
    /// x of the latest point, the renderer keeps it in view
    pub scroll_to: Option<f64>,
    pub y_min: f64,
    pub y_max: f64,
    pub bar_width: f64,
}

/// Append-only series of chart points for one session.
#[derive(Debug, Clone)]
pub struct ChartTimeline {
    session_start_hour: f64,
    current_x: f64,
    points: Vec<ChartPoint>,
}

impl ChartTimeline {
    pub fn new(session_start_hour: f64) -> Self {
        ChartTimeline {
            session_start_hour,
            current_x: 0.0,
            points: Vec::new(),
        }
    }

    pub fn session_start_hour(&self) -> f64 {
        self.session_start_hour
    }

    /// Offset the next appended point will get.
    pub fn current_x(&self) -> f64 {
        self.current_x
    }

    pub fn points(&self) -> &[ChartPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn append(&mut self, value: f64) -> ChartPoint {
        let point = ChartPoint { hour_offset: self.current_x, value };
        self.points.push(point);
        self.current_x += 1.0;
        point
    }

    /// Move the window average of `buffer` onto the timeline. The buffer is always cleared; an
    /// empty window adds no point and does not advance the offset.
    pub fn flush_from(&mut self, buffer: &mut AggregationBuffer) -> Option<ChartPoint> {
        let samples = buffer.len();
        let point = buffer.take_average().map(|average| self.append(average));

        match &point {
            Some(point) => debug!("Flushed {} samples into chart point {:?}", samples, point),
            None => debug!("Flushed empty window, no chart point"),
        }

        point
    }

    /// Points placed on the wall-clock hour axis.
    pub fn positioned(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.points.iter().map(move |point| (self.session_start_hour + point.hour_offset, point.value))
    }

    pub fn feed(&self, config: &ChartConfig) -> ChartFeed {
        let line: Vec<(f64, f64)> = self.positioned().collect();
        let scroll_to = line.last().map(|(x, _)| *x);

        ChartFeed {
            bar: line.clone(),
            line,
            visible_hours: config.visible_hours,
            scroll_to,
            y_min: config.y_min,
            y_max: config.y_max,
            bar_width: config.bar_width,
        }
    }
}
