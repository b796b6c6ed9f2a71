use crate::domain::model::{Bounds, LatLng};
use crate::domain::ports::{FitOptions, MapSurface};
use serde::Serialize;

const TILE_SIZE: f64 = 256.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CameraMove {
    Fit { bounds: Bounds, options: FitOptions },
    View { center: LatLng, zoom: u8 },
}

/// MapSurface without a renderer: keeps the camera history and estimates
/// the zoom a web-mercator map of the given pixel size would settle on.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    width_px: u32,
    height_px: u32,
    zoom: u8,
    center: Option<LatLng>,
    history: Vec<CameraMove>,
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new(1024, 768)
    }
}

impl HeadlessSurface {
    pub fn new(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
            zoom: 0,
            center: None,
            history: Vec::new(),
        }
    }

    pub fn center(&self) -> Option<LatLng> {
        self.center
    }

    pub fn history(&self) -> &[CameraMove] {
        &self.history
    }

    pub fn last_move(&self) -> Option<&CameraMove> {
        self.history.last()
    }

    /// 估算 fitBounds 後的縮放層級
    fn zoom_for(&self, bounds: &Bounds, options: &FitOptions) -> u8 {
        let usable = |px: u32| (px.saturating_sub(options.padding.saturating_mul(2))).max(1) as f64;
        let lat_rad = |lat: f64| {
            let s = lat.to_radians().sin();
            ((1.0 + s) / (1.0 - s)).ln() / 2.0
        };
        let lng_fraction = bounds.lng_span() / 360.0;
        let lat_fraction = (lat_rad(bounds.north_east.lat) - lat_rad(bounds.south_west.lat)).abs() / (2.0 * std::f64::consts::PI);

        let fit = |px: f64, fraction: f64| {
            if fraction <= 0.0 {
                return f64::from(u8::MAX);
            }
            (px / TILE_SIZE / fraction).log2().floor()
        };
        let zoom = fit(usable(self.width_px), lng_fraction)
            .min(fit(usable(self.height_px), lat_fraction))
            .clamp(0.0, 20.0) as u8;

        match options.max_zoom {
            Some(max) => zoom.min(max),
            None => zoom,
        }
    }
}

impl MapSurface for HeadlessSurface {
    fn fit_bounds(&mut self, bounds: Bounds, options: FitOptions) {
        self.zoom = self.zoom_for(&bounds, &options);
        self.center = Some(bounds.center());
        tracing::info!(
            "🗺️  fit ({:.4}, {:.4})-({:.4}, {:.4}) padding {} -> zoom {}",
            bounds.south_west.lat,
            bounds.south_west.lng,
            bounds.north_east.lat,
            bounds.north_east.lng,
            options.padding,
            self.zoom
        );
        self.history.push(CameraMove::Fit { bounds, options });
    }

    fn set_view(&mut self, center: LatLng, zoom: u8) {
        tracing::info!("🗺️  view ({:.4}, {:.4}) zoom {}", center.lat, center.lng, zoom);
        self.zoom = zoom;
        self.center = Some(center);
        self.history.push(CameraMove::View { center, zoom });
    }

    fn zoom(&self) -> u8 {
        self.zoom
    }
}
