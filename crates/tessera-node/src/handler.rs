use tessera_abci::{AbciHandler, HandlerError, HandlerResult};
use tessera_core::types::abci::*;
use tessera_core::Transaction;
use tessera_rounds::{RoundError, RoundSequence, SequenceStatus};
use tessera_state::Storage;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const APP_VERSION: u64 = 1;

/// `info` field of a failed transaction response
fn error_info(error: &RoundError) -> String {
    format!("{}: {}", error.kind(), error)
}

fn decode(tx: &[u8]) -> Result<Transaction, RoundError> {
    Transaction::decode(tx).map_err(|e| RoundError::TransactionNotValid(e.to_string()))
}

/// Bridges consensus engine calls to the round sequence
pub struct RoundHandler<S: Storage> {
    sequence: RoundSequence<S>,
    status: watch::Sender<SequenceStatus>,
}

impl<S: Storage> RoundHandler<S> {
    pub fn new(sequence: RoundSequence<S>, status: watch::Sender<SequenceStatus>) -> Self {
        let handler = RoundHandler { sequence, status };
        handler.publish();
        handler
    }

    pub fn sequence(&self) -> &RoundSequence<S> {
        &self.sequence
    }

    fn publish(&self) {
        self.status.send_replace(self.sequence.status());
    }
}

impl<S: Storage> AbciHandler for RoundHandler<S> {
    fn info(&mut self, request: RequestInfo) -> HandlerResult<ResponseInfo> {
        let response = self.sequence.info().map_err(HandlerError::new)?;
        info!(
            engine_version = %request.version,
            height = response.last_block_height,
            "info requested"
        );
        Ok(ResponseInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            app_version: APP_VERSION,
            ..response
        })
    }

    fn init_chain(&mut self, request: RequestInitChain) -> HandlerResult<ResponseInitChain> {
        let response = self
            .sequence
            .init_chain(&request)
            .map_err(HandlerError::new)?;
        self.publish();
        Ok(response)
    }

    fn begin_block(&mut self, request: RequestBeginBlock) -> HandlerResult<ResponseBeginBlock> {
        self.sequence
            .begin_block(&request)
            .map_err(HandlerError::new)?;
        Ok(ResponseBeginBlock::default())
    }

    fn check_tx(&mut self, request: RequestCheckTx) -> HandlerResult<ResponseTx> {
        let result = decode(&request.tx).and_then(|tx| self.sequence.check_tx(&tx));
        match result {
            Ok(()) => Ok(ResponseTx::ok()),
            Err(e) => {
                debug!("check_tx rejected: {}", e);
                Ok(ResponseTx::error(error_info(&e)))
            }
        }
    }

    fn deliver_tx(&mut self, request: RequestDeliverTx) -> HandlerResult<ResponseTx> {
        let result = decode(&request.tx).and_then(|tx| self.sequence.deliver_tx(tx));
        match result {
            Ok(()) => Ok(ResponseTx::ok()),
            Err(RoundError::LateArrivingTransaction(msg)) => {
                debug!("{}", msg);
                Ok(ResponseTx::ok())
            }
            Err(e) => {
                warn!("deliver_tx rejected: {}", e);
                Ok(ResponseTx::error(error_info(&e)))
            }
        }
    }

    fn end_block(&mut self, request: RequestEndBlock) -> HandlerResult<ResponseEndBlock> {
        self.sequence.end_block().map_err(HandlerError::new)?;
        debug!(height = request.height, "block ended");
        Ok(ResponseEndBlock::default())
    }

    fn commit(&mut self) -> HandlerResult<ResponseCommit> {
        let app_hash = self.sequence.commit().map_err(HandlerError::new)?;
        self.publish();
        Ok(ResponseCommit {
            data: app_hash,
            retain_height: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app;
    use crate::config::generate_sample_config;
    use serde_json::json;
    use tessera_abci::dispatch;
    use tessera_core::{KeyPair, Payload, Timestamp};
    use tessera_rounds::SequenceConfig;
    use tessera_state::MemoryStorage;

    fn setup() -> (Vec<KeyPair>, RoundHandler<MemoryStorage>, watch::Receiver<SequenceStatus>) {
        let mut config = generate_sample_config(4);
        let agents: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        config.setup.participants = agents.iter().map(KeyPair::address).collect();

        let mut sequence = RoundSequence::new(
            app::build(&config).unwrap(),
            MemoryStorage::new(),
            SequenceConfig {
                slashing_enabled: false,
                ..Default::default()
            },
        );
        sequence.setup().unwrap();
        let (sender, receiver) = watch::channel(SequenceStatus::default());
        (agents, RoundHandler::new(sequence, sender), receiver)
    }

    fn registration(agent: &KeyPair) -> Vec<u8> {
        let payload = Payload::new(agent.address(), app::REGISTRATION_PAYLOAD, json!(agent.address()));
        Transaction::sign(payload, &agent.secret).unwrap().encode().unwrap()
    }

    fn begin(height: i64) -> AbciRequest {
        AbciRequest::BeginBlock(RequestBeginBlock {
            header: Some(Header {
                height,
                time: Some(Timestamp::from_secs(1_700_000_000 + height)),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    #[test]
    fn test_status_published_on_creation() {
        let (_, _handler, status) = setup();
        assert_eq!(status.borrow().round.as_deref(), Some("registration_round"));
    }

    #[test]
    fn test_block_lifecycle() {
        let (agents, mut handler, status) = setup();

        assert!(matches!(dispatch(&mut handler, begin(1)), AbciResponse::BeginBlock(_)));
        for agent in &agents {
            let response = dispatch(
                &mut handler,
                AbciRequest::DeliverTx(RequestDeliverTx {
                    tx: registration(agent),
                }),
            );
            match response {
                AbciResponse::DeliverTx(tx) => assert_eq!(tx.code, OK_CODE),
                other => panic!("unexpected response: {:?}", other),
            }
        }
        dispatch(&mut handler, AbciRequest::EndBlock(RequestEndBlock { height: 1 }));
        match dispatch(&mut handler, AbciRequest::Commit) {
            AbciResponse::Commit(commit) => assert_eq!(commit.data.len(), 32),
            other => panic!("unexpected response: {:?}", other),
        }

        let status = status.borrow().clone();
        assert_eq!(status.height, 1);
        assert_eq!(status.round.as_deref(), Some("estimate_round"));
    }

    #[test]
    fn test_invalid_transactions_answered_with_error() {
        let (_, mut handler, _) = setup();
        dispatch(&mut handler, begin(1));

        let response = dispatch(
            &mut handler,
            AbciRequest::DeliverTx(RequestDeliverTx {
                tx: b"garbage".to_vec(),
            }),
        );
        match response {
            AbciResponse::DeliverTx(tx) => {
                assert_eq!(tx.code, ERROR_CODE);
                assert!(tx.info.starts_with("TransactionNotValidError: "));
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let outsider = KeyPair::generate();
        let response = dispatch(
            &mut handler,
            AbciRequest::CheckTx(RequestCheckTx {
                tx: registration(&outsider),
                ..Default::default()
            }),
        );
        match response {
            AbciResponse::CheckTx(tx) => assert_eq!(tx.code, ERROR_CODE),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_out_of_order_call_is_exception() {
        let (_, mut handler, _) = setup();
        let response = dispatch(&mut handler, AbciRequest::Commit);
        assert!(matches!(response, AbciResponse::Exception(_)));
    }
}
