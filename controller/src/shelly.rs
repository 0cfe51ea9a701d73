use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use sunswitch_common::{DeviceScheduleEntry, ScheduleSpec, SwitchAction, SwitchState};

use crate::device::{DeviceError, ScheduleDevice};

const METHOD_DEVICE_INFO: &str = "Shelly.GetDeviceInfo";
const METHOD_SCHEDULE_LIST: &str = "Schedule.List";
const METHOD_SCHEDULE_CREATE: &str = "Schedule.Create";
const METHOD_SCHEDULE_DELETE: &str = "Schedule.Delete";
const METHOD_SWITCH_SET: &str = "Switch.Set";

/// Shelly's RPC error code for an unknown id.
const RPC_CODE_NOT_FOUND: i64 = -105;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub ver: Option<String>,
    #[serde(default)]
    pub app: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u32>,
    #[serde(default)]
    enable: bool,
    timespec: String,
    #[serde(default)]
    calls: Vec<CallWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CallWire {
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct SwitchSetParams {
    id: u32,
    on: bool,
}

#[derive(Debug, Deserialize)]
struct ScheduleListResponse {
    #[serde(default)]
    jobs: Vec<JobWire>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl JobWire {
    fn from_spec(spec: &ScheduleSpec) -> Self {
        Self {
            id: None,
            enable: true,
            timespec: spec.timespec(),
            calls: vec![CallWire {
                method: METHOD_SWITCH_SET.to_string(),
                params: serde_json::json!({
                    "id": spec.action.switch_id,
                    "on": spec.action.state.is_on(),
                }),
            }],
        }
    }

    /// A job counts as a switch action only when its sole call is `Switch.Set`.
    fn switch_action(&self) -> Option<SwitchAction> {
        let [call] = self.calls.as_slice() else {
            return None;
        };
        if !call.method.eq_ignore_ascii_case(METHOD_SWITCH_SET) {
            return None;
        }
        let params = SwitchSetParams::deserialize(&call.params).ok()?;
        Some(SwitchAction::new(params.id, SwitchState::from_on(params.on)))
    }

    fn into_entry(self) -> Option<DeviceScheduleEntry> {
        let action = self.switch_action();
        Some(DeviceScheduleEntry {
            id: self.id?,
            enabled: self.enable,
            timespec: self.timespec,
            action,
        })
    }
}

/// Client for a Shelly Gen2+ device speaking RPC over plain HTTP.
#[derive(Debug, Clone)]
pub struct ShellyClient {
    http: reqwest::Client,
    address: String,
    base_url: String,
}

impl ShellyClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        let address = address.trim_end_matches('/').to_string();
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            format!("{address}/rpc")
        } else {
            format!("http://{address}/rpc")
        };

        Ok(Self {
            http,
            address,
            base_url,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn get_device_info(&self) -> Result<DeviceInfo, DeviceError> {
        info!("fetching device information");
        let device: DeviceInfo = self.call(METHOD_DEVICE_INFO, None).await?;
        info!(
            "device: {} (ID: {}), firmware {} (app: {})",
            device.model.as_deref().unwrap_or("unknown"),
            device.id.as_deref().unwrap_or("unknown"),
            device.ver.as_deref().unwrap_or("unknown"),
            device.app.as_deref().unwrap_or("unknown"),
        );
        Ok(device)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<T, DeviceError> {
        let body = self.rpc(method, params).await?;
        serde_json::from_value(body).map_err(|err| DeviceError::Rejected {
            method,
            code: None,
            message: format!("unexpected response shape: {err}"),
        })
    }

    async fn rpc(&self, method: &'static str, params: Option<Value>) -> Result<Value, DeviceError> {
        let url = format!("{}/{method}", self.base_url);
        let request = match &params {
            Some(params) => {
                debug!("calling {method} with params: {params}");
                self.http.post(&url).json(params)
            }
            None => {
                debug!("calling {method}");
                self.http.get(&url)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|err| self.unreachable(method, err))?;
        let status = response.status();
        let raw = response
            .bytes()
            .await
            .map_err(|err| self.unreachable(method, err))?;

        let Ok(body) = serde_json::from_slice::<Value>(&raw) else {
            return Err(DeviceError::Rejected {
                method,
                code: None,
                message: format!("HTTP {status} with non-JSON body"),
            });
        };

        if let Some(error) = body.get("error") {
            return Err(rejected(method, error));
        }
        if !status.is_success() {
            return Err(rejected(method, &body));
        }

        debug!("response from {method}: {body}");
        Ok(body)
    }

    fn unreachable(&self, method: &'static str, err: reqwest::Error) -> DeviceError {
        warn!("failed to reach device at {} ({method}): {err}", self.address);
        DeviceError::Unreachable {
            address: self.address.clone(),
            method,
            source: Box::new(err),
        }
    }
}

fn rejected(method: &'static str, error: &Value) -> DeviceError {
    let parsed = RpcErrorBody::deserialize(error).unwrap_or(RpcErrorBody {
        code: None,
        message: None,
    });
    DeviceError::Rejected {
        method,
        code: parsed.code,
        message: parsed.message.unwrap_or_else(|| error.to_string()),
    }
}

impl ScheduleDevice for ShellyClient {
    async fn list_schedules(&self) -> Result<Vec<DeviceScheduleEntry>, DeviceError> {
        let response: ScheduleListResponse = self.call(METHOD_SCHEDULE_LIST, None).await?;
        let mut entries = Vec::with_capacity(response.jobs.len());
        for job in response.jobs {
            let timespec = job.timespec.clone();
            match job.into_entry() {
                Some(entry) => entries.push(entry),
                None => warn!("ignoring schedule without id: {timespec}"),
            }
        }
        info!("retrieved {} schedule(s) from device", entries.len());
        Ok(entries)
    }

    async fn create_schedule(
        &self,
        spec: &ScheduleSpec,
    ) -> Result<DeviceScheduleEntry, DeviceError> {
        let job = JobWire::from_spec(spec);
        let params = serde_json::to_value(&job).map_err(|err| DeviceError::Rejected {
            method: METHOD_SCHEDULE_CREATE,
            code: None,
            message: format!("could not encode schedule: {err}"),
        })?;

        let created: CreateResponse = self.call(METHOD_SCHEDULE_CREATE, Some(params)).await?;
        info!(
            "schedule created with ID {}: {} at {}",
            created.id, spec.action, job.timespec
        );

        Ok(DeviceScheduleEntry {
            id: created.id,
            enabled: job.enable,
            timespec: job.timespec,
            action: Some(spec.action),
        })
    }

    async fn delete_schedule(&self, id: u32) -> Result<(), DeviceError> {
        let params = serde_json::json!({ "id": id });
        match self.rpc(METHOD_SCHEDULE_DELETE, Some(params)).await {
            Ok(_) => {
                info!("schedule ID {id} deleted");
                Ok(())
            }
            Err(DeviceError::Rejected {
                code: Some(RPC_CODE_NOT_FOUND),
                ..
            }) => Err(DeviceError::NotFound { id }),
            Err(err) => Err(err),
        }
    }
}
