use std::env;
use std::fmt::Debug;
use std::str::FromStr;

#[derive(Clone, Copy)]
pub struct EnvVarSpec {
    pub key: &'static str,
    pub sensitive: bool,
}

#[derive(Clone, Copy)]
pub struct EnvVarValue<TVal> {
    pub spec: &'static EnvVarSpec,
    pub value: TVal,
}

impl EnvVarSpec {
    pub fn default<TVal: FromStr>(&'static self, default: TVal) -> EnvVarValue<TVal> {
        let as_optional = self.optional();
        EnvVarValue {
            spec: as_optional.spec,
            value: as_optional.value.unwrap_or(default),
        }
    }

    pub fn optional<TVal: FromStr>(&'static self) -> EnvVarValue<Option<TVal>> {
        let value = match env::var(self.key) {
            Ok(val) => {
                let parsed = val
                    .parse()
                    .unwrap_or_else(|_e| panic!("Failed to parse env var {}", self.key));
                Some(parsed)
            }
            Err(e) => {
                tracing::debug!("Failed reading env var {}: {e:?}", self.key);
                None
            }
        };
        EnvVarValue { spec: self, value }
    }

    pub fn required<TVal: FromStr>(&'static self) -> EnvVarValue<TVal> {
        let raw_value = env::var(self.key).unwrap_or_else(|e| panic!("Failed to read env var {}: {e:?}", self.key));
        match raw_value.parse() {
            Ok(value) => EnvVarValue { spec: self, value },
            Err(_e) => {
                panic!("Failed to parse value {} for env var {}", raw_value, self.key)
            }
        }
    }
}

impl<TVal: Debug> Debug for EnvVarValue<TVal> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.spec.sensitive {
            f.write_str("***")
        } else {
            f.write_fmt(format_args!("{:?}", self.value))
        }
    }
}

pub const DATABASE_URL: EnvVarSpec = EnvVarSpec {
    key: "DATABASE_URL",
    sensitive: true,
};
pub const CONSENSUS_FULL_API_URL: EnvVarSpec = EnvVarSpec {
    key: "CONSENSUS_FULL_API_URL",
    sensitive: true,
};
pub const CONSENSUS_ARCHIVE_API_URL: EnvVarSpec = EnvVarSpec {
    key: "CONSENSUS_ARCHIVE_API_URL",
    sensitive: true,
};
pub const CONSENSUS_API_REQUEST_PER_SECOND: EnvVarSpec = EnvVarSpec {
    key: "CONSENSUS_API_REQUEST_PER_SECOND",
    sensitive: false,
};
pub const CONSENSUS_API_RETRIES: EnvVarSpec = EnvVarSpec {
    key: "CONSENSUS_API_RETRIES",
    sensitive: false,
};
pub const CONSENSUS_LOOKBACK_SLOT: EnvVarSpec = EnvVarSpec {
    key: "CONSENSUS_LOOKBACK_SLOT",
    sensitive: false,
};
pub const CONSENSUS_DELAY_SLOTS_TO_HEAD: EnvVarSpec = EnvVarSpec {
    key: "CONSENSUS_DELAY_SLOTS_TO_HEAD",
    sensitive: false,
};
pub const EXECUTION_API_URL: EnvVarSpec = EnvVarSpec {
    key: "EXECUTION_API_URL",
    sensitive: true,
};
pub const EXECUTION_API_BKP_URL: EnvVarSpec = EnvVarSpec {
    key: "EXECUTION_API_BKP_URL",
    sensitive: true,
};
pub const EXECUTION_API_BKP_KEY: EnvVarSpec = EnvVarSpec {
    key: "EXECUTION_API_BKP_KEY",
    sensitive: true,
};
pub const EXECUTION_API_REQUEST_PER_SECOND: EnvVarSpec = EnvVarSpec {
    key: "EXECUTION_API_REQUEST_PER_SECOND",
    sensitive: false,
};
pub const EXECUTION_API_RETRIES: EnvVarSpec = EnvVarSpec {
    key: "EXECUTION_API_RETRIES",
    sensitive: false,
};
pub const CHAIN: EnvVarSpec = EnvVarSpec {
    key: "CHAIN",
    sensitive: false,
};
pub const LOG_LEVEL: EnvVarSpec = EnvVarSpec {
    key: "LOG_LEVEL",
    sensitive: false,
};
pub const LOG_FORMAT: EnvVarSpec = EnvVarSpec {
    key: "LOG_FORMAT",
    sensitive: false,
};
pub const SERVICE_BIND_TO_ADDR: EnvVarSpec = EnvVarSpec {
    key: "SERVICE_BIND_TO_ADDR",
    sensitive: false,
};
pub const MAX_UNPROCESSED_EPOCHS: EnvVarSpec = EnvVarSpec {
    key: "MAX_UNPROCESSED_EPOCHS",
    sensitive: false,
};
