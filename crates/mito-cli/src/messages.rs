//! User-facing headings in the language picked by `MITO_LANG`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    En,
    Zh,
}

impl Lang {
    /// `zh`/`zh_CN`/`zh-TW` select Chinese; anything else is English.
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().to_ascii_lowercase().starts_with("zh") => Lang::Zh,
            _ => Lang::En,
        }
    }

    pub fn from_env() -> Self {
        Self::from_value(std::env::var("MITO_LANG").ok().as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    Running,
    DryRun,
    Workdir,
    PipelineCompleted,
    PipelineFailed,
    PipelinePaused,
    PipelineCancelled,
    Progress,
    SuccessRate,
    Runtime,
    Metrics,
    Outputs,
    Stage,
    ErrorType,
    RootCause,
    Tool,
    Suggestions,
    Logs,
    Warnings,
    TaskId,
    Checkpoint,
    Instructions,
    ResumeWith,
    CurrentStage,
    LastError,
    AllToolsFound,
    MissingTools,
    Registered,
    InstallHint,
}

pub fn text(lang: Lang, msg: Msg) -> &'static str {
    match lang {
        Lang::En => match msg {
            Msg::Running => "Running pipeline",
            Msg::DryRun => "(dry run: no external tools are started)",
            Msg::Workdir => "Working directory",
            Msg::PipelineCompleted => "Pipeline completed",
            Msg::PipelineFailed => "Pipeline failed",
            Msg::PipelinePaused => "Pipeline paused for a manual step",
            Msg::PipelineCancelled => "Pipeline cancelled",
            Msg::Progress => "Progress",
            Msg::SuccessRate => "Success rate",
            Msg::Runtime => "Runtime",
            Msg::Metrics => "Metrics",
            Msg::Outputs => "Outputs",
            Msg::Stage => "Stage",
            Msg::ErrorType => "Error type",
            Msg::RootCause => "Root cause",
            Msg::Tool => "Tool",
            Msg::Suggestions => "Suggestions",
            Msg::Logs => "Logs",
            Msg::Warnings => "Warnings",
            Msg::TaskId => "Task id",
            Msg::Checkpoint => "Checkpoint",
            Msg::Instructions => "Instructions",
            Msg::ResumeWith => "Resume with",
            Msg::CurrentStage => "Current stage",
            Msg::LastError => "Last error",
            Msg::AllToolsFound => "All tools found",
            Msg::MissingTools => "Missing tools",
            Msg::Registered => "Registered",
            Msg::InstallHint => "Install",
        },
        Lang::Zh => match msg {
            Msg::Running => "正在运行流水线",
            Msg::DryRun => "(演练模式：不启动外部工具)",
            Msg::Workdir => "工作目录",
            Msg::PipelineCompleted => "流水线完成",
            Msg::PipelineFailed => "流水线失败",
            Msg::PipelinePaused => "流水线已暂停，等待人工步骤",
            Msg::PipelineCancelled => "流水线已取消",
            Msg::Progress => "进度",
            Msg::SuccessRate => "成功率",
            Msg::Runtime => "运行时间",
            Msg::Metrics => "指标",
            Msg::Outputs => "输出文件",
            Msg::Stage => "阶段",
            Msg::ErrorType => "错误类型",
            Msg::RootCause => "根本原因",
            Msg::Tool => "工具",
            Msg::Suggestions => "建议",
            Msg::Logs => "日志",
            Msg::Warnings => "警告",
            Msg::TaskId => "任务 ID",
            Msg::Checkpoint => "检查点",
            Msg::Instructions => "操作说明",
            Msg::ResumeWith => "恢复命令",
            Msg::CurrentStage => "当前阶段",
            Msg::LastError => "最近错误",
            Msg::AllToolsFound => "所有工具均已找到",
            Msg::MissingTools => "缺失的工具",
            Msg::Registered => "已登记",
            Msg::InstallHint => "安装",
        },
    }
}
