//! Small declarative helpers shared by the HTTP apps.

#[cfg(feature = "actix")]
#[doc(hidden)]
pub use actix_web as __actix;

/// Generate a `routes(cfg)` function registering actix handlers.
///
/// Handlers are listed with `route`, sub-modules (each exposing their own
/// `routes`) with `load`:
///
/// ```rust,ignore
/// macros_utils::routes! {
///     load health,
///     load schedule,
/// }
///
/// macros_utils::routes! {
///     route health_route,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $route:path),+ $(,)?) => {
        pub fn routes(cfg: &mut $crate::__actix::web::ServiceConfig) {
            $(cfg.service($route);)+
        }
    };
    ($(load $module:ident),+ $(,)?) => {
        $(mod $module;)+

        pub fn routes(cfg: &mut $crate::__actix::web::ServiceConfig) {
            $(cfg.configure($module::routes);)+
        }
    };
}
