/// Constructs a new [`Value`](crate::Value) from a supported native type.
#[macro_export]
macro_rules! as_val {
    ($val:expr) => {
        $crate::Value::from($val)
    };
}

/// Constructs a new GeoJSON [`Value`](crate::Value) from a string.
#[macro_export]
macro_rules! as_geo {
    ($val:expr) => {
        $crate::Value::GeoJson($val.to_owned())
    };
}

/// Constructs a new blob [`Value`](crate::Value) from a byte vector.
#[macro_export]
macro_rules! as_blob {
    ($val:expr) => {
        $crate::Value::Blob($val)
    };
}

/// Constructs a new [`Bin`](crate::Bin) from a name and a native value.
#[macro_export]
macro_rules! as_bin {
    ($name:expr, None) => {
        $crate::Bin::new($name, $crate::Value::Nil)
    };
    ($name:expr, $val:expr) => {
        $crate::Bin::new($name, $crate::Value::from($val))
    };
}

/// Constructs a new list [`Value`](crate::Value) from native values.
#[macro_export]
macro_rules! as_list {
    ( $( $v:expr),* ) => {
        $crate::Value::List(vec![ $( $crate::as_val!($v), )* ])
    };
}

/// Constructs a vector of [`Value`](crate::Value)s from native values.
#[macro_export]
macro_rules! as_values {
    ( $( $v:expr),* ) => {
        vec![ $( $crate::as_val!($v), )* ]
    };
}

/// Constructs a new map [`Value`](crate::Value) from key/value pairs.
#[macro_export]
macro_rules! as_map {
    ( $( $k:expr => $v:expr),* ) => {{
        let mut entries = std::collections::HashMap::new();
        $(
            entries.insert($crate::as_val!($k), $crate::as_val!($v));
        )*
        $crate::Value::HashMap(entries)
    }};
}
