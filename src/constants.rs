pub mod credentials {
    /// Random bytes per token; hex encoding doubles the length.
    pub const TOKEN_BYTES: usize = 10;
    pub const TOKEN_HEX_LENGTH: usize = TOKEN_BYTES * 2;
    pub const RSA_KEY_BITS: usize = 2048;
}

pub mod protocol {
    pub const EXEC_START_FAILURE_STATUS: u8 = 255;
    pub const EXTENDED_DATA_STDERR: u32 = 1;
    pub const AUTH_REJECTION_DELAY_MS: u64 = 250;
}

pub mod bridge {
    pub const DEFAULT_ENV_PREFIX: &str = "PACKER_TUNNEL";
    pub const USERNAME_SUFFIX: &str = "_USERNAME";
    pub const PASSWORD_SUFFIX: &str = "_PASSWORD";
    pub const PORT_SUFFIX: &str = "_PORT";
}

pub mod buffers {
    pub const PIPE_READ_CHUNK: usize = 8 * 1024;
}

pub mod limits {
    pub const LOG_COMMAND_MAX_BYTES: usize = 1024;
    pub const MIN_SECRET_LENGTH: usize = 6;
}

pub mod exit_codes {
    pub const FAILURE: i32 = 1;
    pub const CANCELLED: i32 = 130;
}
