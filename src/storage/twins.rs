//! Digital-twin tables: twins, scenarios, runs, snapshots and trained models
//!
//! Deletion cascades twin → scenarios → runs → snapshots, mirroring the
//! foreign-key chain. Snapshots are stored out of line (key
//! `run_id \x1f step(BE)`) so a run row stays small; `save_simulation_run`
//! strips the inline snapshot list into the snapshot tree and
//! `snapshots_for_run` reads it back in step order.

use super::{Store, StoreError, KEY_SEP};
use crate::types::{
    DigitalTwin, SimulationRun, SimulationScenario, SimulationSnapshot, TwinStateModel,
};

fn snapshot_key(run_id: &str, step: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(run_id.len() + 9);
    key.extend_from_slice(run_id.as_bytes());
    key.push(KEY_SEP);
    key.extend_from_slice(&step.to_be_bytes());
    key
}

fn run_prefix(run_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(run_id.len() + 1);
    prefix.extend_from_slice(run_id.as_bytes());
    prefix.push(KEY_SEP);
    prefix
}

impl Store {
    // ------------------------------------------------------------------
    // Twins
    // ------------------------------------------------------------------

    pub fn save_twin(&self, twin: &DigitalTwin) -> Result<(), StoreError> {
        Self::put(&self.twins, twin.id.as_bytes(), twin)
    }

    pub fn load_twin(&self, id: &str) -> Result<Option<DigitalTwin>, StoreError> {
        Self::get(&self.twins, id.as_bytes())
    }

    pub fn list_twins(&self) -> Result<Vec<DigitalTwin>, StoreError> {
        Self::scan(&self.twins)
    }

    /// Delete a twin and everything hanging off it.
    pub fn delete_twin(&self, id: &str) -> Result<(), StoreError> {
        self.twins
            .remove(id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(format!("twin {id}")))?;
        for scenario in Self::scan::<SimulationScenario>(&self.scenarios)? {
            if scenario.twin_id == id {
                self.delete_scenario(&scenario.id)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    pub fn save_scenario(&self, scenario: &SimulationScenario) -> Result<(), StoreError> {
        Self::put(&self.scenarios, scenario.id.as_bytes(), scenario)
    }

    pub fn load_scenario(&self, id: &str) -> Result<Option<SimulationScenario>, StoreError> {
        Self::get(&self.scenarios, id.as_bytes())
    }

    pub fn scenarios_for_twin(
        &self,
        twin_id: &str,
    ) -> Result<Vec<SimulationScenario>, StoreError> {
        Ok(Self::scan::<SimulationScenario>(&self.scenarios)?
            .into_iter()
            .filter(|s| s.twin_id == twin_id)
            .collect())
    }

    /// Delete a scenario and its runs (cascading to snapshots).
    pub fn delete_scenario(&self, id: &str) -> Result<(), StoreError> {
        self.scenarios.remove(id.as_bytes())?;
        for run in Self::scan::<SimulationRun>(&self.runs)? {
            if run.scenario_id == id {
                self.delete_simulation_run(&run.id)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Runs & Snapshots
    // ------------------------------------------------------------------

    /// Persist a run. The inline snapshot list is written to the snapshot
    /// tree and cleared on the stored row; readers wanting the timeline use
    /// `snapshots_for_run`.
    pub fn save_simulation_run(&self, run: &SimulationRun) -> Result<(), StoreError> {
        for snapshot in &run.snapshots {
            Self::put(&self.snapshots, snapshot_key(&run.id, snapshot.step), snapshot)?;
        }
        let mut stored = run.clone();
        stored.snapshots = Vec::new();
        Self::put(&self.runs, run.id.as_bytes(), &stored)
    }

    pub fn load_simulation_run(&self, id: &str) -> Result<Option<SimulationRun>, StoreError> {
        Self::get(&self.runs, id.as_bytes())
    }

    pub fn runs_for_scenario(&self, scenario_id: &str) -> Result<Vec<SimulationRun>, StoreError> {
        Ok(Self::scan::<SimulationRun>(&self.runs)?
            .into_iter()
            .filter(|r| r.scenario_id == scenario_id)
            .collect())
    }

    /// Snapshot timeline of a run, ordered by step.
    pub fn snapshots_for_run(
        &self,
        run_id: &str,
    ) -> Result<Vec<SimulationSnapshot>, StoreError> {
        let mut out = Vec::new();
        for item in self.snapshots.scan_prefix(run_prefix(run_id)) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn delete_simulation_run(&self, id: &str) -> Result<(), StoreError> {
        self.runs.remove(id.as_bytes())?;
        let keys: Vec<_> = self
            .snapshots
            .scan_prefix(run_prefix(id))
            .keys()
            .collect::<Result<Vec<_>, _>>()?;
        for key in keys {
            self.snapshots.remove(key)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Trained twin-state models
    // ------------------------------------------------------------------

    /// One model per ontology; saving replaces any previous model.
    pub fn save_twin_state_model(&self, model: &TwinStateModel) -> Result<(), StoreError> {
        Self::put(&self.models, model.ontology_id.as_bytes(), model)
    }

    pub fn model_for_ontology(
        &self,
        ontology_id: &str,
    ) -> Result<Option<TwinStateModel>, StoreError> {
        Self::get(&self.models, ontology_id.as_bytes())
    }
}
