//! Tipos de erro para o cliente da API do nó.
//!
//! Define [`RemoteError`] com variantes para status HTTP inesperado, timeout,
//! falhas de rede e corpo de resposta inválido. Esses erros nunca saem do
//! módulo `remote`: o [`NodeClient`](super::NodeClient) os registra e os
//! converte em "indisponível".

use thiserror::Error;

/// Erros que podem ocorrer ao interagir com a API do nó.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// O servidor respondeu com um status fora da faixa 2xx.
    #[error("node API returned status {status}")]
    Status { status: u16 },

    /// A requisição excedeu o timeout configurado.
    #[error("request timed out")]
    Timeout,

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    Network(reqwest::Error),

    /// O corpo da resposta não pôde ser decodificado como o JSON esperado.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Network(err)
        }
    }
}
