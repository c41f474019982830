//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements                   | Connects to              |
//! |-------------|------------------------------|--------------------------|
//! | `hardware`  | Actuator, InputPin           | ESP32 LEDC, GPIO         |
//! |             | GasSensorLink                | ESP32 UART driver        |
//! | `log_sink`  | EventSink                    | Serial log output        |
//! | `time`      | MonotonicClock               | ESP32 high-res timer     |
//! |             | RealTimeClock                | System time of day       |

pub mod hardware;
pub mod log_sink;
pub mod time;
