/// Configuration macros
///
/// `config_struct!` defines a configuration struct with its defaults in a
/// single declaration and generates:
/// - The struct with public fields
/// - The `Default` implementation from the embedded values
/// - Serde support with `#[serde(default)]` so partial TOML files load
///
/// # Example
/// ```
/// helpdesk_sync::config_struct! {
///     pub struct RetryConfig {
///         attempts: u32 = 3,
///         delay_ms: u64 = 250,
///     }
/// }
///
/// assert_eq!(RetryConfig::default().attempts, 3);
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
