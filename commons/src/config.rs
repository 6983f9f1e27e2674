//! Configuration merging.
//!
//! Settings are assembled in layers: defaults first, then CLI flags, then
//! file options. Each layer is a bag of `Option` fields carrying only the
//! values the operator actually set; the helpers here overlay one layer
//! onto the settings without disturbing anything the layer left unset.

/// Overlay one layer of configuration options onto runtime settings.
pub trait MergeOptions<T> {
    /// Merge populated values from `options` into these settings,
    /// preserving current values for everything `options` leaves unset.
    fn try_merge(&mut self, options: T) -> crate::Fallible<()>;
}

/// Overwrite a settings field when the option value is populated.
#[macro_export]
macro_rules! assign_if_some {
    ( $target:expr, $opt:expr ) => {
        if let Some(value) = $opt {
            $target = value.into();
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::Fallible;
    use crate::config::MergeOptions;

    struct Settings {
        port: u16,
        prefix: String,
    }

    struct Layer {
        port: Option<u16>,
        prefix: Option<&'static str>,
    }

    impl crate::MergeOptions<Layer> for Settings {
        fn try_merge(&mut self, options: Layer) -> Fallible<()> {
            assign_if_some!(self.port, options.port);
            assign_if_some!(self.prefix, options.prefix);
            Ok(())
        }
    }

    #[test]
    fn unset_options_preserve_settings() -> Fallible<()> {
        let mut settings = Settings {
            port: 8080,
            prefix: "/run".to_string(),
        };

        settings.try_merge(Layer {
            port: Some(9090),
            prefix: None,
        })?;
        assert_eq!(settings.port, 9090);
        assert_eq!(settings.prefix, "/run");

        settings.try_merge(Layer {
            port: None,
            prefix: Some("/v2"),
        })?;
        assert_eq!(settings.port, 9090);
        assert_eq!(settings.prefix, "/v2");
        Ok(())
    }
}
