//! Remote-call dispatch over the WebSocket channel.

pub mod handlers;
pub mod registry;

use std::time::Duration;

use easel_core::protocol::*;

use self::handlers::{backend, configs, jobs};
pub use self::registry::{HandlerRegistry, MessageHandler};

/// Registry with every call type the server answers.
pub fn build_registry(timeout: Duration) -> HandlerRegistry {
    let mut reg = HandlerRegistry::with_timeout(timeout);

    reg.register(CALL_START_GENERATION, jobs::StartGenerationHandler);
    reg.register(CALL_QUEUE_UPSCALE, jobs::QueueUpscaleHandler);
    reg.register(CALL_CANCEL_JOB, jobs::CancelJobHandler);
    reg.register(CALL_GET_SERVER_STATUS, jobs::GetServerStatusHandler);

    reg.register(CALL_START_CONFIG, configs::StartConfigHandler);
    reg.register(CALL_STOP_CONFIG, configs::StopConfigHandler);
    reg.register(CALL_REMOVE_CONFIG, configs::RemoveConfigHandler);
    reg.register(CALL_GET_CONFIGS, configs::GetConfigsHandler);
    reg.register(CALL_ADD_CONFIG, configs::AddConfigHandler);
    reg.register(CALL_UPDATE_CONFIG, configs::UpdateConfigHandler);
    reg.register(CALL_DELETE_CONFIG, configs::DeleteConfigHandler);
    reg.register(CALL_GET_DEFAULT_CONFIG, configs::GetDefaultConfigHandler);

    reg.register(CALL_GET_MODELS, backend::GetModelsHandler);
    reg.register(CALL_GET_SAMPLERS, backend::GetSamplersHandler);
    reg.register(CALL_GET_UPSCALERS, backend::GetUpscalersHandler);
    reg.register(CALL_GET_SCHEDULERS, backend::GetSchedulersHandler);
    reg.register(CALL_SET_MODEL, backend::SetModelHandler);

    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_call_type_is_registered() {
        let reg = build_registry(Duration::from_secs(1));
        for kind in [
            CALL_START_GENERATION,
            CALL_QUEUE_UPSCALE,
            CALL_CANCEL_JOB,
            CALL_GET_SERVER_STATUS,
            CALL_START_CONFIG,
            CALL_STOP_CONFIG,
            CALL_REMOVE_CONFIG,
            CALL_GET_CONFIGS,
            CALL_ADD_CONFIG,
            CALL_UPDATE_CONFIG,
            CALL_DELETE_CONFIG,
            CALL_GET_DEFAULT_CONFIG,
            CALL_GET_MODELS,
            CALL_GET_SAMPLERS,
            CALL_GET_UPSCALERS,
            CALL_GET_SCHEDULERS,
            CALL_SET_MODEL,
        ] {
            assert!(reg.has_handler(kind), "missing handler for {kind}");
        }
        assert_eq!(reg.kinds().len(), 17);
    }
}
