//! Pre-call route bookkeeping.
//!
//! The call surface is an overlay over whatever screen the user was on, so
//! the route is saved when an accept starts and restored once the call is
//! over, after the overlay has had time to unmount.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Router of the host application.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> String;
    fn navigate(&self, route: &str);
}

/// The one route remembered for the live call.
#[derive(Debug, Default)]
pub struct PreCallRoute {
    route: Option<String>,
}

impl PreCallRoute {
    /// Remember `route`. Never overwrites a route saved for a live call.
    pub fn save(&mut self, route: String) -> bool {
        if let Some(ref existing) = self.route {
            tracing::warn!(
                "Pre-call route already saved ({}), not overwriting with {}",
                existing,
                route
            );
            return false;
        }
        tracing::debug!("Saved pre-call route {}", route);
        self.route = Some(route);
        true
    }

    /// Take the saved route, leaving nothing behind.
    pub fn take(&mut self) -> Option<String> {
        self.route.take()
    }

    pub fn get(&self) -> Option<&str> {
        self.route.as_deref()
    }
}

/// Navigate back to `route` once `delay` has passed.
pub async fn restore_after(navigator: Arc<dyn Navigator>, route: String, delay: Duration) {
    tokio::time::sleep(delay).await;
    tracing::info!("Restoring pre-call route {}", route);
    navigator.navigate(&route);
}

/// In-process router used by the CLI: keeps the route in memory and logs changes.
pub struct MemoryNavigator {
    route: Mutex<String>,
}

impl MemoryNavigator {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            route: Mutex::new(initial.into()),
        }
    }
}

impl Navigator for MemoryNavigator {
    fn current_route(&self) -> String {
        self.route.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn navigate(&self, route: &str) {
        let mut guard = self.route.lock().unwrap_or_else(|e| e.into_inner());
        if *guard != route {
            println!("Route: {} -> {}", guard, route);
        }
        *guard = route.to_string();
    }
}
