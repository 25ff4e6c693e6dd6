use crate::capture::CameraRole;

/// Where a request path leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Redirect(&'static str),
    Index,
    Stream(CameraRole),
    NotFound,
}

pub fn resolve(path: &str) -> Route {
    match path {
        "/" => Route::Redirect("/index.html"),
        "/index.html" => Route::Index,
        "/stream.mjpg" | "/leftstream.mjpg" => Route::Stream(CameraRole::Left),
        "/rightstream.mjpg" => Route::Stream(CameraRole::Right),
        _ => Route::NotFound,
    }
}
