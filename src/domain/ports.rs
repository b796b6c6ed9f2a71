use crate::domain::model::{Bounds, LatLng, NavigationMemento, PostalAddress};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// 地址查詢服務；`Ok(None)` 表示查無結果
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &PostalAddress) -> Result<Option<LatLng>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitOptions {
    pub padding: u32,
    pub max_zoom: Option<u8>,
}

/// Rendering backend seen by the core. Zoom changes flow the other way:
/// the host forwards them to `MapSession::on_zoom_change`.
pub trait MapSurface {
    fn fit_bounds(&mut self, bounds: Bounds, options: FitOptions);
    fn set_view(&mut self, center: LatLng, zoom: u8);
    fn zoom(&self) -> u8;
}

/// 宿主端的 session 儲存（例如瀏覽器 sessionStorage）
pub trait MementoStore: Send + Sync {
    fn load(&self) -> impl std::future::Future<Output = Result<Option<NavigationMemento>>> + Send;
    fn save(
        &self,
        memento: &NavigationMemento,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn clear(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn geocoder_endpoint(&self) -> &str;
    fn concurrency(&self) -> usize;
    fn service_areas_path(&self) -> Option<&str>;
    fn directory_path(&self) -> Option<&str>;
}
