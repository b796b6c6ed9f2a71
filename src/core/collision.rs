use crate::domain::model::{LatLng, ResolvedPosition};
use crate::utils::geo::{bearing, destination, haversine_m};
use serde::Serialize;
use std::f64::consts::{FRAC_PI_4, TAU};

pub const MIN_SEPARATION_M: f64 = 5.0;
pub const OFFSET_DISTANCE_M: f64 = 15.0;

/// Label anchor offsets in pixels, cycled by index for undisplaced markers.
pub const LABEL_ANCHORS: [(i32, i32); 6] = [(0, -10), (25, -10), (-25, -10), (0, -30), (20, -30), (-20, -30)];

// 距離小於此值視為同一座標，無法計算方位角
const COINCIDENT_M: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedMarker {
    pub entry_id: String,
    pub original: LatLng,
    pub position: LatLng,
    pub displaced: bool,
    pub label_offset: (i32, i32),
}

/// Spreads markers that would render on top of each other.
///
/// Quadratic in the number of points, which is fine for the entries of a
/// single county or city.
#[derive(Debug, Clone, Copy)]
pub struct CollisionResolver {
    min_separation_m: f64,
    offset_distance_m: f64,
}

impl Default for CollisionResolver {
    fn default() -> Self {
        Self::new(MIN_SEPARATION_M, OFFSET_DISTANCE_M)
    }
}

impl CollisionResolver {
    pub fn new(min_separation_m: f64, offset_distance_m: f64) -> Self {
        Self {
            min_separation_m,
            offset_distance_m,
        }
    }

    pub fn min_separation_m(&self) -> f64 {
        self.min_separation_m
    }

    /// Adjust renderable positions; errored positions are dropped. Output
    /// keeps input order and depends only on that order.
    pub fn resolve(&self, positions: &[ResolvedPosition]) -> Vec<PlacedMarker> {
        let points: Vec<(&str, LatLng)> = positions
            .iter()
            .filter_map(|p| p.renderable().map(|c| (p.entry_id.as_str(), c)))
            .collect();
        let n = points.len();

        let mut headings: Vec<Option<f64>> = (0..n).map(|i| self.heading(&points, i)).collect();
        let mut finals: Vec<LatLng> = points
            .iter()
            .zip(&headings)
            .map(|((_, origin), heading)| match heading {
                Some(h) => destination(*origin, *h, self.offset_distance_m),
                None => *origin,
            })
            .collect();

        // 第二輪：位移後若撞上其他標記，依序旋轉 45 度直到不再重疊
        for i in 0..n {
            let Some(heading) = headings[i] else { continue };
            if self.clear_of_others(&finals, i, finals[i]) {
                continue;
            }
            let rotated = (1..8)
                .map(|k| heading + k as f64 * FRAC_PI_4)
                .map(|h| (h, destination(points[i].1, h, self.offset_distance_m)))
                .find(|(_, candidate)| self.clear_of_others(&finals, i, *candidate));
            match rotated {
                Some((h, candidate)) => {
                    headings[i] = Some(h);
                    finals[i] = candidate;
                }
                None => tracing::debug!("No clear offset for marker {}", points[i].0),
            }
        }

        points
            .iter()
            .enumerate()
            .map(|(i, (id, original))| {
                let position = finals[i];
                let displaced = headings[i].is_some();
                let label_offset = if displaced {
                    let d_lat = position.lat - original.lat;
                    let d_lng = position.lng - original.lng;
                    (
                        (d_lng * 100_000.0).round() as i32,
                        -10 - (d_lat.abs() * 100_000.0).round() as i32,
                    )
                } else {
                    LABEL_ANCHORS[i % LABEL_ANCHORS.len()]
                };
                PlacedMarker {
                    entry_id: id.to_string(),
                    original: *original,
                    position,
                    displaced,
                    label_offset,
                }
            })
            .collect()
    }

    /// Direction to push point `i`, or None when nothing is too close.
    fn heading(&self, points: &[(&str, LatLng)], i: usize) -> Option<f64> {
        let origin = points[i].1;
        let mut east = 0.0;
        let mut north = 0.0;
        let mut coincident = vec![i];

        for (j, (_, other)) in points.iter().enumerate() {
            if j == i {
                continue;
            }
            let d = haversine_m(origin, *other);
            if d >= self.min_separation_m {
                continue;
            }
            if d < COINCIDENT_M {
                coincident.push(j);
                continue;
            }
            let away = bearing(origin, *other) + std::f64::consts::PI;
            east += away.sin();
            north += away.cos();
        }

        if coincident.len() == 1 && east == 0.0 && north == 0.0 {
            return None;
        }

        // 完全重疊的點依索引排序後平均分配角度
        if coincident.len() > 1 {
            coincident.sort_unstable();
            let rank = coincident.iter().position(|&j| j == i).unwrap_or(0);
            let fan = TAU * rank as f64 / coincident.len() as f64;
            east += fan.sin();
            north += fan.cos();
        }

        if east.hypot(north) < 1e-9 {
            return Some(TAU * i as f64 / points.len() as f64);
        }
        Some(east.atan2(north))
    }

    fn clear_of_others(&self, finals: &[LatLng], i: usize, candidate: LatLng) -> bool {
        finals
            .iter()
            .enumerate()
            .all(|(j, p)| j == i || haversine_m(candidate, *p) >= self.min_separation_m)
    }
}
