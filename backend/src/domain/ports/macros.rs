//! Defines helper macros for generating domain port error enums.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            #[doc = concat!("Construct [`Self::", stringify!($variant), "`].")]
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        define_port_error!(@ctor_impl $variant () () $( $field : $ty, )*);
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) ) => {
        ::paste::paste! {
            #[doc = concat!("Construct [`Self::", stringify!($variant), "`].")]
            pub fn [<$variant:snake>]($($params)*) -> Self {
                Self::$variant { $($inits)* }
            }
        }
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) $field:ident : $ty:ty, $($rest:tt)*) => {
        define_port_error!(
            @ctor_impl
            $variant
            ($($params)* $field: impl Into<$ty>,)
            ($($inits)* $field: $field.into(),)
            $($rest)*
        );
    };
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:expr
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*

            /// Snake-case variant label for structured log fields.
            pub fn kind(&self) -> &'static str {
                ::paste::paste! {
                    match self {
                        $( Self::$variant { .. } => stringify!([<$variant:snake>]), )*
                    }
                }
            }
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    define_port_error! {
        pub enum SamplePortError {
            Unreachable => "backend unreachable",
            Query { message: String } => "query failed: {message}",
            Ddl { table: String, message: String } => "ddl on {table} failed: {message}",
            Limit { max: u32 } => "limit {max} exceeded",
        }
    }

    #[test]
    fn unit_variants_get_nullary_constructors() {
        assert_eq!(SamplePortError::unreachable(), SamplePortError::Unreachable);
        assert_eq!(
            SamplePortError::unreachable().to_string(),
            "backend unreachable"
        );
    }

    #[test]
    fn constructors_accept_str_for_string_fields() {
        let err = SamplePortError::query("relation missing");
        assert_eq!(err.to_string(), "query failed: relation missing");
    }

    #[test]
    fn constructors_support_multiple_fields() {
        let err = SamplePortError::ddl("surat", "permission denied");
        assert_eq!(err.to_string(), "ddl on surat failed: permission denied");
    }

    #[test]
    fn kind_labels_variants_in_snake_case() {
        assert_eq!(SamplePortError::unreachable().kind(), "unreachable");
        assert_eq!(SamplePortError::ddl("t", "m").kind(), "ddl");
        assert_eq!(SamplePortError::limit(1_u32).kind(), "limit");
    }

    #[test]
    fn constructors_preserve_non_string_types() {
        let err = SamplePortError::limit(5_u32);
        assert_eq!(err.to_string(), "limit 5 exceeded");
    }
}
