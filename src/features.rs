use std::fmt;
use std::str::FromStr;

/// Opt-in behaviours which reproduce known quirks of the reference machine.
///
/// Parsed from a comma-separated list, eg. `jsrr-index,kbsr-raw`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// `JSRR` adds the 3-bit base register *index* to PC, instead of jumping to the
    /// address held in that register.
    jsrr_index: bool,
    /// Reads of the keyboard status register return the stored word, instead of
    /// reporting that no key is pressed.
    kbsr_raw: bool,
}

impl Features {
    pub fn jsrr_index(&self) -> bool {
        self.jsrr_index
    }

    pub fn kbsr_raw(&self) -> bool {
        self.kbsr_raw
    }

    fn flags(&self) -> [(&'static str, bool); 2] {
        [("jsrr-index", self.jsrr_index), ("kbsr-raw", self.kbsr_raw)]
    }
}

impl FromStr for Features {
    type Err = String;
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let mut features = Self::default();
        for word in string.split(',') {
            let value = match word.trim() {
                "" => continue,
                "jsrr-index" => &mut features.jsrr_index,
                "kbsr-raw" => &mut features.kbsr_raw,
                _ => return Err(format!("Unknown feature '{}'", word)),
            };
            if *value {
                return Err(format!("Cannot specify feature '{}' twice", word));
            }
            *value = true;
        }
        Ok(features)
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut has_any_feature = false;
        for (name, value) in self.flags() {
            if !value {
                continue;
            }
            if has_any_feature {
                write!(f, ",")?;
            }
            write!(f, "{}", name)?;
            has_any_feature = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_features() {
        assert_eq!("".parse::<Features>(), Ok(Features::default()));
        let features: Features = "kbsr-raw,jsrr-index".parse().unwrap();
        assert!(features.jsrr_index());
        assert!(features.kbsr_raw());
        assert_eq!(features.to_string(), "jsrr-index,kbsr-raw");

        let features: Features = "jsrr-index,".parse().unwrap();
        assert!(features.jsrr_index());
        assert!(!features.kbsr_raw());
        assert_eq!(features.to_string(), "jsrr-index");
    }

    #[test]
    fn reject_bad_features() {
        assert_eq!(
            "stack".parse::<Features>(),
            Err("Unknown feature 'stack'".to_string())
        );
        assert_eq!(
            "kbsr-raw,kbsr-raw".parse::<Features>(),
            Err("Cannot specify feature 'kbsr-raw' twice".to_string())
        );
    }
}
