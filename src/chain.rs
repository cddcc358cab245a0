//! EVM chain access for the facilitator.
//!
//! Wraps an alloy provider with wallet signing, local nonce tracking for the
//! hot wallet, and the EIP-3009 token contract bindings the settlement path
//! needs. The hot wallet is a singleton owned by the facilitator process;
//! agents never share it.

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_signer::Signer;
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, NonceManager,
    WalletFiller,
};
use alloy_provider::{Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, sol};
use alloy_transport::TransportError;
use alloy_transport_http::Http;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

use crate::types::{
    AuthorizationMessage, EvmAddress, Network, TokenEip712Metadata, TransactionHash,
    TransferAuthorization,
};

sol! {
    /// Minimal EIP-20 + EIP-3009 surface used by the settlement path.
    #[sol(rpc)]
    interface IEip3009Token {
        function balanceOf(address account) external view returns (uint256);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
        function name() external view returns (string);
        function version() external view returns (string);
        function decimals() external view returns (uint8);
    }
}

/// Filler stack: gas, blob gas, local nonce, chain id.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<HotWalletNonces>, ChainIdFiller>>,
>;

/// The fully composed provider type: fillers + wallet over a [`RootProvider`].
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Local nonce cache for the hot wallet.
///
/// First use of an address queries the pending transaction count (so restarts
/// with transactions still in the mempool do not produce "nonce too low");
/// subsequent sends increment locally. On any send failure the cache entry is
/// dropped back to the sentinel, forcing a fresh query.
#[derive(Clone, Debug, Default)]
pub struct HotWalletNonces {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[async_trait]
impl NonceManager for HotWalletNonces {
    async fn get_next_nonce<P, N>(
        &self,
        provider: &P,
        address: Address,
    ) -> alloy_transport::TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        // u64::MAX marks "not yet fetched".
        const NONE: u64 = u64::MAX;

        // Clone the Arc out so the dashmap shard lock is not held across await.
        let slot = {
            let entry = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(NONE)));
            Arc::clone(entry.value())
        };

        let mut nonce = slot.lock().await;
        let next = if *nonce == NONE {
            tracing::trace!(%address, "fetching account nonce");
            provider.get_transaction_count(address).pending().await?
        } else {
            *nonce + 1
        };
        *nonce = next;
        Ok(next)
    }
}

impl HotWalletNonces {
    /// Forgets the cached nonce so the next send re-queries the RPC.
    /// Called whenever a transaction fails in flight.
    pub async fn reset(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address) {
            let mut nonce = slot.lock().await;
            *nonce = u64::MAX;
            tracing::debug!(%address, "reset nonce cache");
        }
    }
}

/// Target, calldata, and confirmation count for one outgoing transaction.
pub struct MetaTransaction {
    pub to: Address,
    pub calldata: Bytes,
    pub confirmations: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The RPC endpoint could not be reached or returned a transport failure.
    #[error("rpc transport failure: {0}")]
    Rpc(#[from] TransportError),
    /// A read or simulated call failed at the contract level.
    #[error("contract call failed: {0}")]
    Contract(String),
    /// The submitted transaction did not confirm.
    #[error("pending transaction failure: {0}")]
    Pending(#[from] PendingTransactionError),
}

impl ChainError {
    /// True when the failure is the RPC being unreachable, as opposed to a
    /// revert or a malformed call.
    pub fn is_rpc_unavailable(&self) -> bool {
        matches!(self, ChainError::Rpc(_))
    }
}

fn contract_error(e: alloy_contract::Error) -> ChainError {
    match e {
        alloy_contract::Error::TransportError(transport) => ChainError::Rpc(transport),
        other => ChainError::Contract(format!("{other}")),
    }
}

/// Result of submitting a settlement transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub transaction: TransactionHash,
    pub confirmed: bool,
}

/// On-chain reads and the one write the facilitator performs.
///
/// [`EvmChainProvider`] is the production implementation; tests substitute an
/// in-memory ledger.
pub trait TokenChain: Send + Sync {
    fn network(&self) -> Network;

    fn chain_id(&self) -> u64 {
        self.network().chain_id()
    }

    /// Token balance of `owner` at the latest head.
    fn token_balance(
        &self,
        token: EvmAddress,
        owner: EvmAddress,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send;

    /// Whether the token has already consumed `(authorizer, nonce)`.
    fn authorization_consumed(
        &self,
        token: EvmAddress,
        authorizer: EvmAddress,
        nonce: B256,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send;

    /// The token's EIP-712 domain metadata, read from the contract.
    fn token_eip712(
        &self,
        token: EvmAddress,
    ) -> impl Future<Output = Result<TokenEip712Metadata, ChainError>> + Send;

    /// Executes `transferWithAuthorization` and waits for one confirmation.
    fn settle_transfer(
        &self,
        token: EvmAddress,
        auth: &TransferAuthorization,
    ) -> impl Future<Output = Result<Settlement, ChainError>> + Send;
}

impl<T: TokenChain> TokenChain for Arc<T> {
    fn network(&self) -> Network {
        self.as_ref().network()
    }

    fn token_balance(
        &self,
        token: EvmAddress,
        owner: EvmAddress,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send {
        self.as_ref().token_balance(token, owner)
    }

    fn authorization_consumed(
        &self,
        token: EvmAddress,
        authorizer: EvmAddress,
        nonce: B256,
    ) -> impl Future<Output = Result<bool, ChainError>> + Send {
        self.as_ref().authorization_consumed(token, authorizer, nonce)
    }

    fn token_eip712(
        &self,
        token: EvmAddress,
    ) -> impl Future<Output = Result<TokenEip712Metadata, ChainError>> + Send {
        self.as_ref().token_eip712(token)
    }

    fn settle_transfer(
        &self,
        token: EvmAddress,
        auth: &TransferAuthorization,
    ) -> impl Future<Output = Result<Settlement, ChainError>> + Send {
        self.as_ref().settle_transfer(token, auth)
    }
}

/// Provider for one EVM chain, holding the facilitator hot wallet.
#[derive(Debug)]
pub struct EvmChainProvider {
    network: Network,
    eip1559: bool,
    receipt_timeout_secs: u64,
    inner: InnerProvider,
    hot_wallet: Address,
    nonce_manager: HotWalletNonces,
}

impl EvmChainProvider {
    /// Connects to `rpc_url` with the given hot-wallet signer.
    pub fn connect(
        rpc_url: Url,
        signer: PrivateKeySigner,
        network: Network,
        eip1559: bool,
        receipt_timeout_secs: u64,
    ) -> Self {
        let chain_id = network.chain_id();
        let signer = signer.with_chain_id(Some(chain_id));
        let hot_wallet = signer.address();
        let wallet = EthereumWallet::from(signer);

        let client = RpcClient::new(Http::new(rpc_url), false);

        let nonce_manager = HotWalletNonces::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::default(),
                ),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        tracing::info!(chain_id, %hot_wallet, "initialized EVM provider");

        Self {
            network,
            eip1559,
            receipt_timeout_secs,
            inner,
            hot_wallet,
            nonce_manager,
        }
    }

    pub fn hot_wallet(&self) -> EvmAddress {
        EvmAddress(self.hot_wallet)
    }

    pub fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    /// Sends a transaction from the hot wallet and waits for confirmations.
    ///
    /// On non-EIP-1559 chains the suggested gas price is refreshed immediately
    /// before each send. Any failure after nonce allocation resets the local
    /// nonce cache, because the transaction may or may not have reached the
    /// mempool.
    pub async fn send_transaction(
        &self,
        tx: MetaTransaction,
    ) -> Result<TransactionReceipt, ChainError> {
        let mut txr = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(self.hot_wallet)
            .with_input(tx.calldata);

        if !self.eip1559 {
            let gas_price = self.inner.get_gas_price().await?;
            txr.set_gas_price(gas_price);
        }

        if txr.gas.is_none() {
            let gas_limit = self.inner.estimate_gas(txr.clone()).await?;
            txr.set_gas_limit(gas_limit);
        }

        let pending = match self.inner.send_transaction(txr).await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.reset(self.hot_wallet).await;
                return Err(ChainError::Rpc(e));
            }
        };

        let timeout = std::time::Duration::from_secs(self.receipt_timeout_secs);
        let watcher = pending
            .with_required_confirmations(tx.confirmations)
            .with_timeout(Some(timeout));

        match watcher.get_receipt().await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.nonce_manager.reset(self.hot_wallet).await;
                Err(ChainError::Pending(e))
            }
        }
    }
}

impl TokenChain for EvmChainProvider {
    fn network(&self) -> Network {
        self.network
    }

    async fn token_balance(
        &self,
        token: EvmAddress,
        owner: EvmAddress,
    ) -> Result<U256, ChainError> {
        let contract = IEip3009Token::new(token.into(), &self.inner);
        contract
            .balanceOf(owner.into())
            .call()
            .await
            .map_err(contract_error)
    }

    async fn authorization_consumed(
        &self,
        token: EvmAddress,
        authorizer: EvmAddress,
        nonce: B256,
    ) -> Result<bool, ChainError> {
        let contract = IEip3009Token::new(token.into(), &self.inner);
        contract
            .authorizationState(authorizer.into(), nonce)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn token_eip712(&self, token: EvmAddress) -> Result<TokenEip712Metadata, ChainError> {
        let contract = IEip3009Token::new(token.into(), &self.inner);
        let name = contract.name().call().await.map_err(contract_error)?;
        let version = contract.version().call().await.map_err(contract_error)?;
        Ok(TokenEip712Metadata { name, version })
    }

    /// Submits `transferWithAuthorization` for a signed authorization and waits
    /// for one confirmation. The hot wallet pays gas.
    async fn settle_transfer(
        &self,
        token: EvmAddress,
        auth: &TransferAuthorization,
    ) -> Result<Settlement, ChainError> {
        let calldata = transfer_with_authorization_calldata(auth);
        let receipt: TransactionReceipt = self
            .send_transaction(MetaTransaction {
                to: token.into(),
                calldata,
                confirmations: 1,
            })
            .await?;
        Ok(Settlement {
            transaction: TransactionHash::from(receipt.transaction_hash),
            confirmed: receipt.status(),
        })
    }
}

/// ABI-encodes the `transferWithAuthorization(..., v, r, s)` call for a signed
/// authorization.
pub fn transfer_with_authorization_calldata(auth: &TransferAuthorization) -> Bytes {
    let message: &AuthorizationMessage = &auth.authorization;
    let call = IEip3009Token::transferWithAuthorizationCall {
        from: message.from.into(),
        to: message.to.into(),
        value: message.value.into(),
        validAfter: U256::from(message.valid_after.as_secs()),
        validBefore: U256::from(message.valid_before.as_secs()),
        nonce: message.nonce.into(),
        v: auth.signature.v(),
        r: auth.signature.r(),
        s: auth.signature.s(),
    };
    call.abi_encode().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::UnixTimestamp;
    use crate::types::{AuthorizationNonce, EvmSignature, TokenAmount};

    #[test]
    fn calldata_starts_with_selector() {
        let auth = TransferAuthorization {
            signature: EvmSignature([0x01; 65]),
            authorization: AuthorizationMessage {
                from: EvmAddress(Address::repeat_byte(0xaa)),
                to: EvmAddress(Address::repeat_byte(0xbb)),
                value: TokenAmount::from(10_000u64),
                valid_after: UnixTimestamp(0),
                valid_before: UnixTimestamp(2_000_000_000),
                nonce: AuthorizationNonce([0x02; 32]),
            },
        };
        let calldata = transfer_with_authorization_calldata(&auth);
        assert_eq!(
            &calldata[..4],
            &IEip3009Token::transferWithAuthorizationCall::SELECTOR[..]
        );
        // selector + 9 words
        assert_eq!(calldata.len(), 4 + 9 * 32);
    }
}
