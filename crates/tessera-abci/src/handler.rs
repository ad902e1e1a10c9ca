use std::fmt;

use tessera_core::types::abci::*;
use thiserror::Error;

/// Failure that aborts the current engine call.
///
/// The server turns it into an exception response, which the consensus
/// engine treats as fatal for the block in progress.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl fmt::Display) -> Self {
        HandlerError(message.to_string())
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

const NOT_SUPPORTED: &str = "operation not supported";

/// Application callbacks, one per request kind.
///
/// Every method has a default so that an application only overrides the
/// calls it cares about.
pub trait AbciHandler: Send {
    fn echo(&mut self, request: RequestEcho) -> HandlerResult<ResponseEcho> {
        Ok(ResponseEcho {
            message: request.message,
        })
    }

    fn flush(&mut self) -> HandlerResult<()> {
        Ok(())
    }

    fn info(&mut self, _request: RequestInfo) -> HandlerResult<ResponseInfo> {
        Ok(ResponseInfo::default())
    }

    fn set_option(&mut self, _request: RequestSetOption) -> HandlerResult<ResponseSetOption> {
        Ok(ResponseSetOption {
            code: ERROR_CODE,
            log: NOT_SUPPORTED.to_string(),
            info: String::new(),
        })
    }

    fn init_chain(&mut self, _request: RequestInitChain) -> HandlerResult<ResponseInitChain> {
        Ok(ResponseInitChain::default())
    }

    fn query(&mut self, _request: RequestQuery) -> HandlerResult<ResponseQuery> {
        Ok(ResponseQuery {
            code: ERROR_CODE,
            log: NOT_SUPPORTED.to_string(),
            ..Default::default()
        })
    }

    fn begin_block(&mut self, _request: RequestBeginBlock) -> HandlerResult<ResponseBeginBlock> {
        Ok(ResponseBeginBlock::default())
    }

    fn check_tx(&mut self, _request: RequestCheckTx) -> HandlerResult<ResponseTx> {
        Ok(ResponseTx::error(""))
    }

    fn deliver_tx(&mut self, _request: RequestDeliverTx) -> HandlerResult<ResponseTx> {
        Ok(ResponseTx::error(""))
    }

    fn end_block(&mut self, _request: RequestEndBlock) -> HandlerResult<ResponseEndBlock> {
        Ok(ResponseEndBlock::default())
    }

    fn commit(&mut self) -> HandlerResult<ResponseCommit> {
        Ok(ResponseCommit::default())
    }

    fn list_snapshots(&mut self) -> HandlerResult<ResponseListSnapshots> {
        Ok(ResponseListSnapshots::default())
    }

    fn offer_snapshot(
        &mut self,
        _request: RequestOfferSnapshot,
    ) -> HandlerResult<ResponseOfferSnapshot> {
        Ok(ResponseOfferSnapshot::default())
    }

    fn load_snapshot_chunk(
        &mut self,
        _request: RequestLoadSnapshotChunk,
    ) -> HandlerResult<ResponseLoadSnapshotChunk> {
        Ok(ResponseLoadSnapshotChunk::default())
    }

    fn apply_snapshot_chunk(
        &mut self,
        _request: RequestApplySnapshotChunk,
    ) -> HandlerResult<ResponseApplySnapshotChunk> {
        Ok(ResponseApplySnapshotChunk::default())
    }
}

/// Route `request` to the matching handler method
pub fn dispatch<H: AbciHandler + ?Sized>(handler: &mut H, request: AbciRequest) -> AbciResponse {
    let result = match request {
        AbciRequest::Echo(r) => handler.echo(r).map(AbciResponse::Echo),
        AbciRequest::Flush => handler.flush().map(|_| AbciResponse::Flush),
        AbciRequest::Info(r) => handler.info(r).map(AbciResponse::Info),
        AbciRequest::SetOption(r) => handler.set_option(r).map(AbciResponse::SetOption),
        AbciRequest::InitChain(r) => handler.init_chain(r).map(AbciResponse::InitChain),
        AbciRequest::Query(r) => handler.query(r).map(AbciResponse::Query),
        AbciRequest::BeginBlock(r) => handler.begin_block(r).map(AbciResponse::BeginBlock),
        AbciRequest::CheckTx(r) => handler.check_tx(r).map(AbciResponse::CheckTx),
        AbciRequest::DeliverTx(r) => handler.deliver_tx(r).map(AbciResponse::DeliverTx),
        AbciRequest::EndBlock(r) => handler.end_block(r).map(AbciResponse::EndBlock),
        AbciRequest::Commit => handler.commit().map(AbciResponse::Commit),
        AbciRequest::ListSnapshots => handler.list_snapshots().map(AbciResponse::ListSnapshots),
        AbciRequest::OfferSnapshot(r) => handler.offer_snapshot(r).map(AbciResponse::OfferSnapshot),
        AbciRequest::LoadSnapshotChunk(r) => handler
            .load_snapshot_chunk(r)
            .map(AbciResponse::LoadSnapshotChunk),
        AbciRequest::ApplySnapshotChunk(r) => handler
            .apply_snapshot_chunk(r)
            .map(AbciResponse::ApplySnapshotChunk),
    };
    result.unwrap_or_else(|e| AbciResponse::Exception(ResponseException { error: e.0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Defaults;

    impl AbciHandler for Defaults {}

    struct FailingCommit;

    impl AbciHandler for FailingCommit {
        fn commit(&mut self) -> HandlerResult<ResponseCommit> {
            Err(HandlerError::new("cannot accept a 'commit' request"))
        }
    }

    #[test]
    fn test_echo_echoes() {
        let response = dispatch(
            &mut Defaults,
            AbciRequest::Echo(RequestEcho {
                message: "hello".to_string(),
            }),
        );
        assert_eq!(
            response,
            AbciResponse::Echo(ResponseEcho {
                message: "hello".to_string()
            })
        );
    }

    #[test]
    fn test_unsupported_defaults() {
        match dispatch(&mut Defaults, AbciRequest::Query(RequestQuery::default())) {
            AbciResponse::Query(q) => {
                assert_eq!(q.code, ERROR_CODE);
                assert_eq!(q.log, "operation not supported");
            }
            other => panic!("unexpected response {:?}", other),
        }
        match dispatch(&mut Defaults, AbciRequest::DeliverTx(RequestDeliverTx::default())) {
            AbciResponse::DeliverTx(tx) => assert_eq!(tx.code, ERROR_CODE),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_every_kind_gets_its_own_response() {
        let requests = vec![
            AbciRequest::Flush,
            AbciRequest::Info(RequestInfo::default()),
            AbciRequest::InitChain(RequestInitChain::default()),
            AbciRequest::BeginBlock(RequestBeginBlock::default()),
            AbciRequest::EndBlock(RequestEndBlock::default()),
            AbciRequest::Commit,
            AbciRequest::ListSnapshots,
            AbciRequest::OfferSnapshot(RequestOfferSnapshot::default()),
            AbciRequest::LoadSnapshotChunk(RequestLoadSnapshotChunk::default()),
            AbciRequest::ApplySnapshotChunk(RequestApplySnapshotChunk::default()),
        ];
        for request in requests {
            let kind = request.kind();
            assert_eq!(dispatch(&mut Defaults, request).kind(), kind);
        }
    }

    #[test]
    fn test_handler_error_becomes_exception() {
        let response = dispatch(&mut FailingCommit, AbciRequest::Commit);
        assert_eq!(
            response,
            AbciResponse::Exception(ResponseException {
                error: "cannot accept a 'commit' request".to_string()
            })
        );
    }
}
