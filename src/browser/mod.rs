//! Browser automation module
//!
//! This module provides browser control through ChromiumOxide: lifecycle
//! management, navigation, and the CDP implementation of
//! [`Surface`](crate::page::Surface).

pub mod controller;
pub mod navigation;
pub mod surface;

pub use controller::{BrowserConfig, BrowserConfigBuilder, BrowserController, PageHandle};
pub use navigation::{
    CaptureThrottle, NavigationOptions, NavigationResult, PageNavigator, UrlValidator, WaitUntil,
};
pub use surface::CdpSurface;
