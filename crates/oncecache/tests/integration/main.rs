mod coalescing;
mod failures;
mod utils;
