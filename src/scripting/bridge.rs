//! 脚本调用适配
//!
//! `ScriptBridge` 在 `ShareableValue` 与宿主的 JSON 值之间按类型转换，
//! 并把宿主的 `false` 转成带诊断信息的 `ScriptError`。

use std::sync::{Arc, Mutex};

use crate::core::error::{ScriptError, ScriptResult};
use crate::protocol::value::{Record, Schema, ShareableValue, TypeTag};
use crate::scripting::host::{ScriptHost, ScriptReport};

type Reports = Arc<Mutex<Vec<ScriptReport>>>;

/// 包装一个脚本宿主
pub struct ScriptBridge<H: ScriptHost> {
    host: H,
    reports: Reports,
}

impl<H: ScriptHost> ScriptBridge<H> {
    pub fn new(mut host: H) -> Self {
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        host.set_error_reporter(Box::new(move |report| {
            log_report(&report);
            sink.lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(report);
        }));
        Self { host, reports }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// 取出并清空已收集的诊断信息
    pub fn take_reports(&self) -> Vec<ScriptReport> {
        std::mem::take(&mut *self.reports.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// 失败原因：本次调用期间上报的错误，没有时使用 `fallback`
    fn failure_reason(&self, since: usize, fallback: &str) -> String {
        let reports = self.reports.lock().unwrap_or_else(|p| p.into_inner());
        let errors: Vec<String> = reports
            .iter()
            .skip(since)
            .filter(|r| !r.is_warning)
            .map(|r| r.to_string())
            .collect();
        if errors.is_empty() {
            fallback.to_string()
        } else {
            errors.join("; ")
        }
    }

    fn report_count(&self) -> usize {
        self.reports.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn eval(&mut self, code: &str, filename: &str) -> ScriptResult<()> {
        let since = self.report_count();
        if self.host.eval(code, filename) {
            return Ok(());
        }
        Err(ScriptError::EvalFailed(
            self.failure_reason(since, &format!("{} failed to evaluate", filename)),
        ))
    }

    /// 调用具名函数，返回值按 `returns` 转换
    pub fn call(
        &mut self,
        name: &str,
        args: &[ShareableValue],
        returns: &TypeTag,
    ) -> ScriptResult<ShareableValue> {
        let args: Vec<_> = args.iter().map(ShareableValue::to_json).collect();
        let since = self.report_count();
        let value = self.host.call_function(name, &args).ok_or_else(|| ScriptError::CallFailed {
            name: name.to_string(),
            reason: self.failure_reason(since, "host reported failure"),
        })?;
        Ok(ShareableValue::from_json(&value, returns)?)
    }

    /// 以记录的各字段作为位置参数调用，返回值按 `returns` 组成记录
    pub fn call_record(
        &mut self,
        name: &str,
        args: &Record,
        schema: &Schema,
        returns: &Schema,
    ) -> ScriptResult<Record> {
        let mut positional = Vec::with_capacity(schema.len());
        for field in schema.fields() {
            let value = args.get(&field.name).ok_or_else(|| {
                ScriptError::Conversion(crate::core::error::MarshalError::SchemaMismatch(format!(
                    "missing argument `{}`",
                    field.name
                )))
            })?;
            positional.push(value.clone());
        }
        match self.call(name, &positional, &TypeTag::Record(returns.clone()))? {
            ShareableValue::Record(record) => Ok(record),
            other => Err(ScriptError::CallFailed {
                name: name.to_string(),
                reason: format!("expected record, got {}", other.kind_name()),
            }),
        }
    }

    pub fn get_property(&mut self, name: &str, tag: &TypeTag) -> ScriptResult<ShareableValue> {
        let since = self.report_count();
        let value = self.host.get_property(name).ok_or_else(|| ScriptError::PropertyFailed {
            name: name.to_string(),
            reason: self.failure_reason(since, "property not available"),
        })?;
        Ok(ShareableValue::from_json(&value, tag)?)
    }

    pub fn set_property(&mut self, name: &str, value: &ShareableValue) -> ScriptResult<()> {
        let since = self.report_count();
        if self.host.set_property(name, value.to_json()) {
            return Ok(());
        }
        Err(ScriptError::PropertyFailed {
            name: name.to_string(),
            reason: self.failure_reason(since, "host rejected value"),
        })
    }
}

fn log_report(report: &ScriptReport) {
    if report.is_warning {
        tracing::warn!(
            target: "bridge.script",
            file = %report.filename,
            line = report.line,
            "{}",
            report.message
        );
    } else {
        tracing::error!(
            target: "bridge.script",
            file = %report.filename,
            line = report.line,
            "{}",
            report.message
        );
    }
}
