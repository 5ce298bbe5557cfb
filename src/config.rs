/// Seat name seeded into every new surface's acceptance list.
pub const DEFAULT_SEAT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub default_seat: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_seat: DEFAULT_SEAT.to_owned(),
        }
    }
}

impl Config {
    /// Defaults, overridden by `IVI_INPUT_DEFAULT_SEAT` when set and non-empty.
    pub fn from_env() -> Config {
        let mut config = Config::default();
        if let Some(seat) = env("IVI_INPUT_DEFAULT_SEAT") {
            config.default_seat = seat;
        }
        config
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_seat_is_default() {
        assert_eq!(Config::default().default_seat, "default");
    }
}
