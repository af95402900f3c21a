use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use verifier_core::config::AppConfig;
use verifier_core::logging::{LogConfig, OutputFormat};
use verifier_core::models::{ClaimFilter, MLAnalysisType, RecordIdentity, ServiceApiVersion};
use verifier_core::traits::LoggingStateClient;
use verifier_dispatcher::{AnalysisContextService, AnalysisTaskQueue, BackoffKey, BackoffScheduler};
use verifier_infrastructure::DatabaseManager;

/// 持续验证分析流水线 - 运维命令行工具
#[derive(Parser, Debug)]
#[command(name = "verifier")]
#[command(version = "1.0.0")]
#[command(about = "持续验证分析流水线 - 运维命令行工具")]
struct Cli {
    /// 配置文件路径，未指定时按默认路径查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 创建数据库表结构
    Migrate,
    /// 领取一个分析任务并输出JSON
    ClaimTask {
        #[arg(long, default_value = "V1")]
        version: ServiceApiVersion,
        /// 只领取持续验证（true）或部署验证（false）任务
        #[arg(long)]
        continuous: Option<bool>,
        /// 逗号分隔的任务类型，如 LOG_ML,TIME_SERIES
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<MLAnalysisType>>,
    },
    /// 领取一个分析上下文并输出JSON
    ClaimContext {
        #[arg(long, default_value = "V1")]
        version: ServiceApiVersion,
    },
    /// 检查验证执行是否有任务用完重试仍在运行
    TimedOut {
        #[arg(long)]
        workflow: String,
        #[arg(long)]
        state: String,
    },
    /// 查询持续验证分钟的退避状态
    Backoff {
        /// 任务的执行ID，未指定时取配置的伪执行ID
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        cv_config: String,
        #[arg(long)]
        minute: i64,
        #[arg(long = "type", default_value = "TIME_SERIES")]
        task_type: MLAnalysisType,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    let mut log_config = LogConfig::from_observability(&config.observability).with_env_overrides();
    if let Some(level) = &cli.log_level {
        log_config.level = level.parse().context("无效的日志级别")?;
    }
    if let Some(format) = &cli.log_format {
        log_config.format = format.parse().context("无效的日志格式")?;
    }
    init_logging(&log_config)?;

    if config.observability.metrics_enabled {
        install_metrics_exporter(&config.observability.metrics_bind_address)?;
    }

    let database = DatabaseManager::new(&config.database)
        .await
        .with_context(|| format!("连接数据库失败: {}", config.database.url))?;

    let result = run(cli.command, &config, &database).await;
    database.close().await;
    result
}

async fn run(command: Commands, config: &AppConfig, database: &DatabaseManager) -> Result<()> {
    let task_queue = AnalysisTaskQueue::new(
        database.task_store(),
        Arc::new(LoggingStateClient),
        config.analysis.clone(),
    );

    match command {
        Commands::Migrate => {
            database.migrate().await.context("数据库迁移失败")?;
            info!("数据库表结构已就绪");
        }
        Commands::ClaimTask {
            version,
            continuous,
            types,
        } => {
            let filter = claim_filter(continuous, types);
            match task_queue.claim(version, &filter).await.context("领取分析任务失败")? {
                Some(task) => println!("{}", serde_json::to_string_pretty(&task)?),
                None => info!("没有可领取的分析任务"),
            }
        }
        Commands::ClaimContext { version } => {
            let contexts =
                AnalysisContextService::new(database.context_store(), config.analysis.clone());
            match contexts.get_next(version).await.context("领取分析上下文失败")? {
                Some(context) => println!("{}", serde_json::to_string_pretty(&context)?),
                None => info!("没有可领取的分析上下文"),
            }
        }
        Commands::TimedOut { workflow, state } => {
            let timed_out = task_queue
                .has_timed_out(&workflow, &state)
                .await
                .context("查询超时任务失败")?;
            if timed_out {
                warn!("验证执行 {} 存在用完重试仍在运行的任务", state);
            }
            println!("{}", serde_json::json!({ "timed_out": timed_out }));
        }
        Commands::Backoff {
            state,
            cv_config,
            minute,
            task_type,
        } => {
            let key = BackoffKey {
                state_execution_id: state.unwrap_or_else(|| {
                    RecordIdentity::cv_config(cv_config.clone()).task_state_execution_id()
                }),
                cv_config_id: cv_config,
                analysis_minute: minute,
                ml_analysis_type: task_type,
            };
            let scheduler = BackoffScheduler::new(database.task_store(), config.analysis.clone());
            let decision = scheduler
                .next_backoff(&key, chrono::Utc::now())
                .await
                .context("查询退避状态失败")?;
            println!("{decision:?}");
        }
    }

    Ok(())
}

fn claim_filter(continuous: Option<bool>, types: Option<Vec<MLAnalysisType>>) -> ClaimFilter {
    let mut filter = ClaimFilter::default();
    if let Some(continuous) = continuous {
        filter = filter.with_continuous(continuous);
    }
    if let Some(types) = types {
        filter = filter.with_types(types);
    }
    filter
}

/// 初始化日志系统
fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        OutputFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("初始化JSON日志失败")?,
        OutputFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("初始化日志失败")?,
    }

    Ok(())
}

fn install_metrics_exporter(bind_address: &str) -> Result<()> {
    let address: std::net::SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus指标导出器失败")?;
    info!("Prometheus指标导出器监听于 {}", address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_task_arguments_build_filter() {
        let cli = Cli::try_parse_from([
            "verifier",
            "claim-task",
            "--continuous",
            "true",
            "--types",
            "LOG_ML,TIME_SERIES",
        ])
        .unwrap();

        let Commands::ClaimTask {
            version,
            continuous,
            types,
        } = cli.command
        else {
            panic!("expected claim-task command");
        };
        assert_eq!(version, ServiceApiVersion::V1);

        let filter = claim_filter(continuous, types);
        assert_eq!(filter.is_24x7, Some(true));
        assert_eq!(
            filter.task_types,
            Some(vec![MLAnalysisType::LogMl, MLAnalysisType::TimeSeries])
        );
    }

    #[test]
    fn test_claim_task_defaults_to_any_task() {
        let cli = Cli::try_parse_from(["verifier", "claim-task"]).unwrap();
        let Commands::ClaimTask {
            continuous, types, ..
        } = cli.command
        else {
            panic!("expected claim-task command");
        };
        assert_eq!(claim_filter(continuous, types), ClaimFilter::default());
    }
}
