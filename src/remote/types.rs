//! Tipos de dados das requisições e respostas da API do nó.
//!
//! Os valores monetários chegam como strings de inteiros em unidades base
//! (10^18 por token); a conversão para [`Tokens`](crate::state::Tokens)
//! acontece em [`NodeBalance::to_update`], não na desserialização, para que
//! um valor malformado seja rejeitado pelo ciclo de polling e não pelo cliente.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::{AmountError, BalanceUpdate, Tokens};

/// Resposta de `GET /node/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Status reportado pelo nó (ex.: "Standby", "Initiating").
    pub status: String,
}

/// Um valor em unidades base, no formato `{ "amount": "<inteiro>" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAmount {
    pub amount: String,
}

/// Resposta de `GET /node/balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeBalance {
    /// Saldo calculado pelo nó. Apenas registrado em log; o saldo exibido é
    /// sempre derivado das recompensas.
    #[serde(default)]
    pub balance: Option<String>,
    pub withdrawn: RawAmount,
    /// Recompensas por fonte (nome da fonte -> valor em unidades base).
    #[serde(default)]
    pub earned: BTreeMap<String, RawAmount>,
}

impl NodeBalance {
    /// Converte todos os valores; falha por inteiro se qualquer um for inválido.
    pub fn to_update(&self) -> Result<BalanceUpdate, AmountError> {
        let withdrawn = Tokens::parse_base_units(&self.withdrawn.amount)?;
        let earned = self
            .earned
            .iter()
            .map(|(source, raw)| Ok((source.clone(), Tokens::parse_base_units(&raw.amount)?)))
            .collect::<Result<Vec<_>, AmountError>>()?;
        Ok(BalanceUpdate { withdrawn, earned })
    }
}

/// Corpo de `PUT /node/update`.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialsRequest<'a> {
    pub wallet_address: &'a str,
    pub private_key: &'a str,
}

/// Confirmação opaca devolvida por `PUT /node/update`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Ack(pub serde_json::Value);
