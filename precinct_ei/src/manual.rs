/*!

This is the long-form manual for `precinct_ei` and `eiprep`.

## What is computed

Ecological inference estimates how the voters of one contest (the row
categories, for example the presidential candidates) split in another contest
(the column categories, for example the senate candidates), using only
precinct totals. The estimator needs, for every precinct:

* the share of registered voters in each row category,
* the share of registered voters in each column category,
* the number of registered voters.

Both share vectors get an extra residual category, `No Vote / Other`, that
holds everyone not tallied to a declared category. Each precinct column is
then a probability distribution.

## Stages

### Classification

Every reported (contest, candidate, party) goes through an ordered table of
rules. The first matching rule decides:

* `category`: the votes go to a declared category,
* `opaque`: the votes are kept aside under `{contest id}_{candidate id}`,
* `ignore`: the votes are dropped and counted in the audit.

A record that matches no rule stops the run. Add a catch-all `opaque` or
`ignore` rule at the end of the table to accept everything else.

Contest and candidate names are compared without regard to case. Parties are
compared exactly, so `Democratic` does not match `DEMOCRATIC`.

### Aggregation

Precinct names are reduced to a key: anything from the first `(` on is
dropped, then the name is lower-cased and trimmed. `P1 (Ward 3)` and `p1`
are the same precinct and their counts are summed. Records reported twice
(for example in two result files) are summed as well.

### Join

The registration table is matched on the same key. A precinct missing from
the registration table has an unknown registration (not zero) and stops the
normalization. A precinct present only in the registration table has zero
votes everywhere. If two registration rows share a key with different counts,
the run stops with an `UnresolvedPrecinct` error listing both rows.

### Normalization

Each count is divided by the registration count of its precinct. The run
stops if a category, or the total of a group, exceeds the registration count:
the residual would be negative. A precinct with zero registered voters and no
votes is all residual (or an error with the `strict` policy).

## Configuration file

```json
{
  "outputSettings": { "analysisName": "2024 general", "outputPath": "summary.json" },
  "resultsSources": [ { "filePath": "results.json" } ],
  "registrationSource": {
    "provider": "csv",
    "filePath": "registered_voters.csv",
    "precinctColumn": "precinct",
    "countColumn": "registered"
  },
  "rowCategories": ["Harris", "Trump", "President_Other"],
  "columnCategories": ["Senate_D", "Senate_R", "Senate_Other"],
  "rules": { "zeroRegistration": "residual", "undeclaredCategories": "reject" }
}
```

Without a `classifier` section, the presidential / senate table is used. A
custom table lists the declared `categories` and the ordered `rules`:

```json
"classifier": {
  "categories": ["Yes", "No"],
  "rules": [
    { "contestNameContains": "proposal 1", "candidateNameEquals": "yes", "category": "Yes" },
    { "contestNameContains": "proposal 1", "candidateNameEquals": "no", "category": "No" },
    { "action": "ignore" }
  ]
}
```

## Estimator output

The summary written by `eiprep` contains everything the estimator needs. Its
answer (posterior means) can be passed back with `--posterior`: a JSON object
with `rowLabels`, `columnLabels` and `values`, where `values[r][c]` is the
share of row category `r` voters in column category `c`. Each row must sum
to 1.

*/
