#![allow(unused_macros)]
//! Diagnostic macros used by the pipeline itself.
//!
//! These are meant for the pipeline's own components (processor, exporters,
//! registry), never for application logging. With the `internal-logs`
//! feature they become `tracing` events whose target is this crate's name, so
//! a subscriber can filter them with `beacon_sdk=debug`. Under `cfg(test)`
//! they also print to stdout, which helps when running tests with
//! `--nocapture`.
//!
//! Every event takes a `name` in `Component.Event` form plus optional
//! `key = value` fields:
//!
//! ```ignore
//! beacon_warn!(name: "BatchProcessor.RecordsDropped", dropped = 12);
//! ```
//!
//! The level wrappers all expand to [`beacon_event!`], which is the only
//! place that knows how an event is rendered.

/// Emits one diagnostic event at `$level`, one of the `tracing::Level`
/// constants. `$tag` prefixes the line printed under `cfg(test)`.
macro_rules! beacon_event {
    ($level:ident, $tag:literal, name: $name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        #[cfg(feature = "internal-logs")]
        {
            $crate::_private::event!(
                name: $name,
                target: env!("CARGO_PKG_NAME"),
                $crate::_private::Level::$level,
                name = $name
                $(, $key = $value)*
            );
        }

        #[cfg(test)]
        {
            let mut line = format!("{}: name={}", $tag, $name);
            $(
                line.push_str(&format!(", {}={}", stringify!($key), $value));
            )*
            println!("{line}");
        }

        #[cfg(all(not(feature = "internal-logs"), not(test)))]
        {
            let _ = ($name, $($value),*);
        }
    };
}

macro_rules! beacon_debug {
    ($($event:tt)+) => {
        beacon_event!(DEBUG, "beacon_debug", $($event)+)
    };
}

macro_rules! beacon_info {
    ($($event:tt)+) => {
        beacon_event!(INFO, "beacon_info", $($event)+)
    };
}

macro_rules! beacon_warn {
    ($($event:tt)+) => {
        beacon_event!(WARN, "beacon_warn", $($event)+)
    };
}

macro_rules! beacon_error {
    ($($event:tt)+) => {
        beacon_event!(ERROR, "beacon_error", $($event)+)
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn every_level_accepts_bare_and_keyed_events() {
        let dropped = 12_u64;
        beacon_debug!(name: "Test.Bare");
        beacon_info!(name: "Test.Keyed", dropped = dropped);
        beacon_warn!(name: "Test.Trailing", dropped = dropped, reason = "full",);
        beacon_error!(name: "Test.Owned", error = "boom".to_string());
    }
}
