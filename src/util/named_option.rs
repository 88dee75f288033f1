/// Declares a closed set of named options.
///
/// Generates a `Copy` enum with case-insensitive `FromStr`, `Display`, and serde support
/// through `String`, so an unknown name fails with `ForecastError::Configuration` both when
/// parsed directly and when a config file is deserialized.
macro_rules! named_option {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($what:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        $vis enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every accepted option, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical name of the option.
            pub fn label(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::ForecastError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let trimmed = value.trim();
                $(
                    if trimmed.eq_ignore_ascii_case($label) {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::error::ForecastError::Configuration(format!(
                    "unsupported {} '{}', expected one of: {}",
                    $what,
                    value,
                    [$($label),+].join(", ")
                )))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::error::ForecastError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.label().to_string()
            }
        }
    };
}

pub(crate) use named_option;
