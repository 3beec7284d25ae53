mod automation;
mod error;
mod surface;

pub use automation::{BrowserHandle, BrowserLauncher, OpenOptions};
pub use error::{BrowserError, BrowserResult};
pub use surface::{
    ChromiumSurface, ChromiumSurfaceFactory, DriverSurface, SessionCookie, SurfaceFactory,
};
