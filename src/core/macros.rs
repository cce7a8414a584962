//! 核心宏定义

/// 为配置结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use game_engine_bridge::impl_default;
///
/// struct QueueSettings {
///     capacity: usize,
///     name: String,
/// }
///
/// impl_default!(QueueSettings {
///     capacity: 256,
///     name: "editor->game".to_string(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    struct Limits {
        depth: usize,
        label: String,
    }

    impl_default!(Limits {
        depth: 100,
        label: "history".to_string(),
    });

    #[test]
    fn test_impl_default() {
        let limits = Limits::default();
        assert_eq!(limits.depth, 100);
        assert_eq!(limits.label, "history");
    }
}
