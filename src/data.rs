//! Choice records, choice sets, and the validated dataset consumed by every estimator.

use std::collections::HashMap;

use nalgebra::{DMatrix, DMatrixView, Dyn, MatrixView, U1};
use serde::{Deserialize, Serialize};

use crate::error::{MnlError, Result};

/// One alternative of one choice task, as delivered by the survey loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChoiceRecord {
    /// Identifier of the respondent who faced the task.
    pub respondent_id: u64,
    /// Identifier of the task within the respondent's questionnaire.
    pub task_id: u64,
    /// Encoded covariates of the alternative (dummies, price, ...).
    pub attributes: Vec<f64>,
    /// Whether the respondent picked this alternative.
    pub chosen: bool,
}

impl ChoiceRecord {
    /// Convenience constructor.
    pub fn new(respondent_id: u64, task_id: u64, attributes: Vec<f64>, chosen: bool) -> Self {
        Self {
            respondent_id,
            task_id,
            attributes,
            chosen,
        }
    }
}

/// Validated repeated-choice data grouped into choice sets.
///
/// Alternatives are stored as rows of a single design matrix; each
/// [`ChoiceSet`] owns a contiguous block of rows. The dataset is read-only once
/// built and can be shared freely between estimators and sampler threads.
#[derive(Clone, Debug)]
pub struct ChoiceDataset {
    design: DMatrix<f64>,
    sets: Vec<ChoiceSet>,
    attribute_names: Option<Vec<String>>,
}

impl ChoiceDataset {
    /// Groups and validates raw records. See [`ChoiceDatasetBuilder::build`].
    pub fn build(records: Vec<ChoiceRecord>) -> Result<Self> {
        ChoiceDatasetBuilder::new(records).build()
    }

    /// Number of choice sets (respondent × task pairs).
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Number of alternatives across all choice sets.
    pub fn alternative_count(&self) -> usize {
        self.design.nrows()
    }

    /// Number of attributes per alternative (`K`).
    pub fn dimension(&self) -> usize {
        self.design.ncols()
    }

    /// Number of distinct respondents.
    pub fn respondent_count(&self) -> usize {
        let mut ids: Vec<u64> = self.sets.iter().map(|set| set.respondent_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Returns the stacked design matrix, one row per alternative.
    pub fn design(&self) -> &DMatrix<f64> {
        &self.design
    }

    /// Iterates over choice sets in their stable order.
    pub fn sets(&self) -> impl Iterator<Item = &ChoiceSet> {
        self.sets.iter()
    }

    /// Returns the choice set at `index`, if any.
    pub fn set(&self, index: usize) -> Option<&ChoiceSet> {
        self.sets.get(index)
    }

    /// Attribute rows of the choice set at `index`.
    pub fn alternatives(&self, index: usize) -> Option<DMatrixView<'_, f64>> {
        let set = self.sets.get(index)?;
        Some(self.design.rows(set.start, set.len()))
    }

    /// Borrowed views over the alternatives of the choice set at `index`.
    pub fn alternative_views(&self, index: usize) -> Option<Vec<Alternative<'_>>> {
        let set = self.sets.get(index)?;
        Some(
            set.range()
                .map(|row| Alternative {
                    attributes: self.design.row(row),
                    chosen: row == set.chosen_row(),
                })
                .collect(),
        )
    }

    /// Optional names of the attribute columns.
    pub fn attribute_names(&self) -> Option<&[String]> {
        self.attribute_names.as_deref()
    }
}

/// Borrowed view of a single alternative inside a [`ChoiceDataset`].
#[derive(Clone, Debug)]
pub struct Alternative<'a> {
    /// Attribute row of length `K`.
    pub attributes: MatrixView<'a, f64, U1, Dyn, U1, Dyn>,
    /// Whether this alternative was picked.
    pub chosen: bool,
}

/// Builder that groups and validates records before constructing a [`ChoiceDataset`].
#[derive(Debug)]
pub struct ChoiceDatasetBuilder {
    records: Vec<ChoiceRecord>,
    attribute_names: Option<Vec<String>>,
}

impl ChoiceDatasetBuilder {
    /// Start building a dataset from flat survey records.
    pub fn new(records: Vec<ChoiceRecord>) -> Self {
        Self {
            records,
            attribute_names: None,
        }
    }

    /// Names the attribute columns, e.g. `["brand_netflix", "price"]`.
    pub fn attribute_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.attribute_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Groups records by `(respondent, task)` and validates every group.
    ///
    /// Groups keep the order in which their first record appears, and
    /// alternatives keep their input order inside the group, so row indices
    /// are reproducible for a given input. Fails on the first group that has
    /// fewer than two alternatives, no chosen alternative, several chosen
    /// alternatives, a non-finite attribute, or an attribute vector whose
    /// length differs from the first record's.
    pub fn build(self) -> Result<ChoiceDataset> {
        let first = self.records.first().ok_or(MnlError::EmptyDataset)?;
        let k = first.attributes.len();
        if k == 0 {
            return Err(MnlError::dimension_mismatch("attribute vector", 1, 0));
        }

        if let Some(names) = &self.attribute_names {
            if names.len() != k {
                return Err(MnlError::dimension_mismatch(
                    "attribute names",
                    k,
                    names.len(),
                ));
            }
        }

        let mut group_of: HashMap<(u64, u64), usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (index, record) in self.records.iter().enumerate() {
            let key = (record.respondent_id, record.task_id);
            let group = *group_of.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(index);
        }

        let mut values = Vec::with_capacity(self.records.len() * k);
        let mut sets = Vec::with_capacity(groups.len());
        let mut start = 0usize;

        for members in &groups {
            let head = &self.records[members[0]];
            let (respondent, task) = (head.respondent_id, head.task_id);

            if members.len() < 2 {
                return Err(MnlError::TooFewAlternatives {
                    respondent,
                    task,
                    count: members.len(),
                });
            }

            let mut chosen = Vec::new();
            for (offset, &record_index) in members.iter().enumerate() {
                let record = &self.records[record_index];
                if record.attributes.len() != k {
                    return Err(MnlError::InconsistentDimension {
                        respondent,
                        task,
                        expected: k,
                        found: record.attributes.len(),
                    });
                }
                if let Some(index) = record.attributes.iter().position(|v| !v.is_finite()) {
                    return Err(MnlError::NonFiniteAttribute {
                        respondent,
                        task,
                        index,
                    });
                }
                if record.chosen {
                    chosen.push(offset);
                }
                values.extend_from_slice(&record.attributes);
            }

            let chosen_offset = match chosen.as_slice() {
                [offset] => *offset,
                [] => return Err(MnlError::NoChosenAlternative { respondent, task }),
                many => {
                    return Err(MnlError::MultipleChosenAlternatives {
                        respondent,
                        task,
                        count: many.len(),
                    })
                }
            };

            let end = start + members.len();
            sets.push(ChoiceSet {
                respondent_id: respondent,
                task_id: task,
                start,
                end,
                chosen_offset,
            });
            start = end;
        }

        let design = DMatrix::from_row_slice(start, k, &values);

        Ok(ChoiceDataset {
            design,
            sets,
            attribute_names: self.attribute_names,
        })
    }
}

/// Metadata for a single choice task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceSet {
    respondent_id: u64,
    task_id: u64,
    /// Start row (inclusive) of this set in the design matrix.
    pub(crate) start: usize,
    /// End row (exclusive) of this set.
    pub(crate) end: usize,
    chosen_offset: usize,
}

impl ChoiceSet {
    /// Identifier of the respondent.
    pub fn respondent_id(&self) -> u64 {
        self.respondent_id
    }

    /// Identifier of the task.
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Range of design-matrix rows that belong to this set.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// Number of alternatives offered.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Always false: a validated set has at least two alternatives.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Position of the chosen alternative within the set.
    pub fn chosen_offset(&self) -> usize {
        self.chosen_offset
    }

    /// Design-matrix row of the chosen alternative.
    pub fn chosen_row(&self) -> usize {
        self.start + self.chosen_offset
    }
}
