use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_name_list, parse_u16, parse_u32, parse_u64, parse_usize,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, ImportSettings, MarksSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
};

const MAX_SAVE_GRACE_MS: u64 = 60_000;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("MARKS_HOST", "0.0.0.0");
        let port = env_or_default("MARKS_PORT", "8000");

        let environment =
            parse_environment(env_optional("MARKS_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("MARKS_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Marks Engine API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "marks");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "marks_db");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "MARKS_DB_MAX_CONNECTIONS",
            env_or_default("MARKS_DB_MAX_CONNECTIONS", "20"),
        )?;

        let save_grace_ms =
            parse_u64("MARKS_SAVE_GRACE_MS", env_or_default("MARKS_SAVE_GRACE_MS", "2000"))?;
        let optimistic_locking = env_optional("MARKS_OPTIMISTIC_LOCKING")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let max_open_sessions = parse_usize(
            "MARKS_MAX_OPEN_SESSIONS",
            env_or_default("MARKS_MAX_OPEN_SESSIONS", "500"),
        )?;
        let session_idle_secs = parse_u64(
            "MARKS_SESSION_IDLE_SECS",
            env_or_default("MARKS_SESSION_IDLE_SECS", "1800"),
        )?;

        let import = ImportSettings {
            admission_columns: parse_name_list(env_optional("IMPORT_ADMISSION_COLUMNS")),
            roll_columns: parse_name_list(env_optional("IMPORT_ROLL_COLUMNS")),
            name_columns: parse_name_list(env_optional("IMPORT_NAME_COLUMNS")),
            marks_columns: parse_name_list(env_optional("IMPORT_MARKS_COLUMNS")),
            absent_columns: parse_name_list(env_optional("IMPORT_ABSENT_COLUMNS")),
        };

        let log_level = env_or_default("MARKS_LOG_LEVEL", "info");
        let json = env_optional("MARKS_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings { host: ServerHost::parse(host)?, port: ServerPort::parse(port)? },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            marks: MarksSettings {
                save_grace_ms,
                optimistic_locking,
                max_open_sessions,
                session_idle_secs,
            },
            import,
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn marks(&self) -> &MarksSettings {
        &self.marks
    }

    pub(crate) fn import(&self) -> &ImportSettings {
        &self.import
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.marks.save_grace_ms > MAX_SAVE_GRACE_MS {
            return Err(ConfigError::InvalidValue {
                field: "MARKS_SAVE_GRACE_MS",
                value: self.marks.save_grace_ms.to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MARKS_DB_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if self.marks.max_open_sessions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MARKS_MAX_OPEN_SESSIONS",
                value: "0".to_string(),
            });
        }

        if self.marks.session_idle_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MARKS_SESSION_IDLE_SECS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        Ok(())
    }
}
