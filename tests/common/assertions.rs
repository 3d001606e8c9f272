//! Custom assertion macros and utilities

/// Assert that a result is ok and return the value
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error matching a pattern
macro_rules! assert_err {
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Assert on a conversation summary's unread count
macro_rules! assert_unread {
    ($snapshot:expr, $other:expr, $expected:expr) => {
        let unread = $snapshot
            .conversation_with(&$other.into())
            .map(|s| s.unread_count)
            .unwrap_or_else(|| panic!("no conversation with {}", $other));
        assert_eq!(unread, $expected, "unread count with {}", $other);
    };
}
