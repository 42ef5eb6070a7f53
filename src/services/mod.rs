/// OpenAPI documentation generation.
pub mod documentation;
/// Sista Chansen and the final reveal.
pub mod final_guess_service;
/// Lobby creation and lookup.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Message texts and inline keyboards.
pub mod notifications;
/// Startup catch-up against the timetable.
pub mod recovery;
/// Round coordinator.
pub mod round_service;
/// Pure game rules.
pub mod rules;
/// Weekday timetable driver.
pub mod scheduler;
/// Storage reconnection supervisor toggling degraded mode.
pub mod storage_supervisor;
#[cfg(test)]
pub mod testing;
