// ── Policy operations ──
//
// Resolve operator requests against a device, keep them in the policy
// store, and apply them on demand.

use tracing::info;

use crate::error::EngineError;
use crate::model::ShortAddr;
use crate::policy::{
    BindingApplyReport, BindingPolicy, BindingRequest, ReportingApplyReport, ReportingPolicy,
    ReportingRequest, apply_binding, apply_reporting,
};
use crate::radio::Radio;

use super::Engine;

impl<R: Radio> Engine<R> {
    // ── Reporting ───────────────────────────────────────────────────

    /// Resolve and store a reporting policy, replacing any stored for
    /// the same endpoints.
    pub fn configure_reporting_policy(
        &mut self,
        short_addr: ShortAddr,
        request: &ReportingRequest,
    ) -> Result<Vec<ReportingPolicy>, EngineError> {
        let policies = request.resolve(self.device(short_addr)?)?;
        for policy in &policies {
            self.policies.put_reporting(policy.clone());
        }
        info!(short_addr = %short_addr, count = policies.len(), "reporting policy stored");
        Ok(policies)
    }

    /// Stored policies for one device, or all.
    pub fn reporting_policies(&self, short_addr: Option<ShortAddr>) -> Vec<ReportingPolicy> {
        self.policies.reporting(short_addr)
    }

    pub fn clear_reporting_policy(&mut self, short_addr: ShortAddr, endpoint: Option<u8>) -> usize {
        self.policies.clear_reporting(short_addr, endpoint)
    }

    /// Apply stored reporting policies, one report per endpoint.
    pub fn apply_reporting_policy(
        &mut self,
        short_addr: ShortAddr,
        endpoint: Option<u8>,
    ) -> Result<Vec<ReportingApplyReport>, EngineError> {
        let policies: Vec<ReportingPolicy> = self
            .policies
            .reporting(Some(short_addr))
            .into_iter()
            .filter(|p| endpoint.is_none_or(|ep| p.endpoint == ep))
            .collect();
        if policies.is_empty() {
            return Err(EngineError::not_found(format!(
                "reporting policy for device {short_addr}"
            )));
        }
        Ok(policies
            .iter()
            .map(|policy| apply_reporting(&mut self.radio, &self.caps, policy))
            .collect())
    }

    // ── Binding ─────────────────────────────────────────────────────

    pub fn configure_binding_policy(
        &mut self,
        short_addr: ShortAddr,
        request: &BindingRequest,
    ) -> Result<Vec<BindingPolicy>, EngineError> {
        let policies = request.resolve(self.device(short_addr)?, self.config.local_endpoint)?;
        for policy in &policies {
            self.policies.put_binding(policy.clone());
        }
        info!(short_addr = %short_addr, count = policies.len(), "binding policy stored");
        Ok(policies)
    }

    pub fn binding_policies(&self, short_addr: Option<ShortAddr>) -> Vec<BindingPolicy> {
        self.policies.binding(short_addr)
    }

    pub fn clear_binding_policy(&mut self, short_addr: ShortAddr, endpoint: Option<u8>) -> usize {
        self.policies.clear_binding(short_addr, endpoint)
    }

    /// Apply stored binding policies. Bindings default to the local
    /// node as destination.
    pub fn apply_binding_policy(
        &mut self,
        short_addr: ShortAddr,
        endpoint: Option<u8>,
    ) -> Result<Vec<BindingApplyReport>, EngineError> {
        let src_ieee = self.device(short_addr)?.ieee_addr();
        let policies: Vec<BindingPolicy> = self
            .policies
            .binding(Some(short_addr))
            .into_iter()
            .filter(|p| endpoint.is_none_or(|ep| p.endpoint == ep))
            .collect();
        if policies.is_empty() {
            return Err(EngineError::not_found(format!(
                "binding policy for device {short_addr}"
            )));
        }
        let local_ieee = self.radio.ieee_addr().ok();
        Ok(policies
            .iter()
            .map(|policy| apply_binding(&mut self.radio, &self.caps, policy, src_ieee, local_ieee))
            .collect())
    }
}
