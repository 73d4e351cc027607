//! Forwards to the macros of the `log` crate when the `log` feature is
//! enabled, and compiles to nothing when it isn't.

#[cfg(feature = "log")]
macro_rules! info {
    ($($t:tt)+) => {
        log::info!($($t)+)
    };
}

#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($t:tt)+) => {{}};
}

#[cfg(feature = "log")]
macro_rules! trace {
    ($($t:tt)+) => {
        log::trace!($($t)+)
    };
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($t:tt)+) => {{}};
}
